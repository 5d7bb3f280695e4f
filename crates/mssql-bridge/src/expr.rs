//! Filter and expression trees handed down by the host engine.
//!
//! These are tagged variants rather than open inheritance: the pushdown
//! encoder visits them with a single `encode` pass that reports, per
//! node, whether the fragment is expressible in T-SQL.

use tds_types::SqlValue;

/// Comparison operators supported in pushdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    LtEq,
    /// `>=`
    GtEq,
}

impl CompareOp {
    /// The T-SQL operator text.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
        }
    }
}

/// A column reference inside a filter: a physical column by scan ordinal,
/// or the synthetic rowid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColRef {
    /// Physical column, by position in the bound column list.
    Column(usize),
    /// The synthetic rowid column.
    RowId,
}

/// A rowid value: scalar for single-column keys, a named struct for
/// composite keys.
#[derive(Debug, Clone, PartialEq)]
pub enum RowIdValue {
    /// Scalar key value.
    Scalar(SqlValue),
    /// Composite key value: `(column name, value)` pairs.
    Struct(Vec<(String, SqlValue)>),
}

/// A constant compared against a column.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Plain SQL value.
    Value(SqlValue),
    /// Rowid value (only meaningful against [`ColRef::RowId`]).
    RowId(RowIdValue),
}

/// String match shapes mapped to `LIKE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// `prefix(col, s)` — `LIKE 's%'`
    Prefix,
    /// `suffix(col, s)` — `LIKE '%s'`
    Suffix,
    /// `contains(col, s)` — `LIKE '%s%'`
    Contains,
}

/// A scalar expression in an expression filter.
#[derive(Debug, Clone, PartialEq)]
pub enum PushExpr {
    /// Reference to a bound column.
    Column(ColRef),
    /// Constant value.
    Constant(SqlValue),
    /// Logical negation.
    Not(Box<PushExpr>),
    /// Whitelisted function application (`lower`, `year`, `date_part`, ...).
    Func {
        /// Host-engine function name.
        name: String,
        /// Arguments.
        args: Vec<PushExpr>,
    },
    /// String match (prefix/suffix/contains), optionally case-insensitive.
    Match {
        /// Matched column or expression.
        expr: Box<PushExpr>,
        /// Literal needle.
        needle: String,
        /// Match shape.
        kind: MatchKind,
        /// Case-insensitive variant.
        case_insensitive: bool,
    },
    /// Comparison between two scalar expressions.
    Compare {
        /// Left side.
        left: Box<PushExpr>,
        /// Operator.
        op: CompareOp,
        /// Right side.
        right: Box<PushExpr>,
    },
}

/// A filter node in the host engine's scan filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanFilter {
    /// `col OP constant`.
    Compare {
        /// Filtered column.
        column: ColRef,
        /// Operator.
        op: CompareOp,
        /// Constant operand.
        value: FilterValue,
    },
    /// `col IS NULL` / `col IS NOT NULL`.
    IsNull {
        /// Filtered column.
        column: ColRef,
        /// True for IS NOT NULL.
        negated: bool,
    },
    /// `col IN (v, ...)`.
    InList {
        /// Filtered column.
        column: ColRef,
        /// Constant set.
        values: Vec<SqlValue>,
    },
    /// Conjunction. Unpushable children may be dropped from the pushed
    /// clause; the host re-applies all filters in that case.
    And(Vec<ScanFilter>),
    /// Disjunction. All-or-nothing: one unpushable child blocks the whole
    /// node.
    Or(Vec<ScanFilter>),
    /// A free-form boolean expression.
    Expr(PushExpr),
}

impl ScanFilter {
    /// Convenience: `col = value`.
    #[must_use]
    pub fn eq(column: usize, value: SqlValue) -> Self {
        Self::Compare {
            column: ColRef::Column(column),
            op: CompareOp::Eq,
            value: FilterValue::Value(value),
        }
    }

    /// Convenience: `rowid OP value`.
    #[must_use]
    pub fn rowid(op: CompareOp, value: RowIdValue) -> Self {
        Self::Compare {
            column: ColRef::RowId,
            op,
            value: FilterValue::RowId(value),
        }
    }
}
