//! T-SQL generation: quoting, literals, and the filter pushdown encoder.

use std::collections::HashMap;

use chrono::SecondsFormat;
use once_cell::sync::Lazy;
use tds_types::SqlValue;

use mssql_catalog::{RowIdKind, TableColumn};

use crate::expr::{
    ColRef, CompareOp, FilterValue, MatchKind, PushExpr, RowIdValue, ScanFilter,
};

/// Bracket-quote an identifier, doubling `]`.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// N-quote a string literal, doubling `'` (forces Unicode).
#[must_use]
pub fn quote_string(s: &str) -> String {
    format!("N'{}'", s.replace('\'', "''"))
}

/// Render a constant as a T-SQL literal. Returns `None` for values with
/// no stable textual form (non-finite floats).
#[must_use]
pub fn literal(value: &SqlValue) -> Option<String> {
    Some(match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        SqlValue::TinyInt(v) => v.to_string(),
        SqlValue::SmallInt(v) => v.to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::BigInt(v) => v.to_string(),
        SqlValue::Float(v) => {
            if !v.is_finite() {
                return None;
            }
            v.to_string()
        }
        SqlValue::Double(v) => {
            if !v.is_finite() {
                return None;
            }
            v.to_string()
        }
        SqlValue::Decimal(v) => v.to_string(),
        SqlValue::String(s) => quote_string(s),
        SqlValue::Binary(b) => {
            let mut out = String::with_capacity(2 + b.len() * 2);
            out.push_str("0x");
            for byte in b.iter() {
                out.push_str(&format!("{byte:02X}"));
            }
            out
        }
        SqlValue::Uuid(u) => format!("'{u}'"),
        SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        SqlValue::Time(t) => format!("'{}'", t.format("%H:%M:%S%.6f")),
        SqlValue::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.6f")),
        SqlValue::DateTimeOffset(dto) => {
            format!("'{}'", dto.to_rfc3339_opts(SecondsFormat::Micros, false))
        }
    })
}

/// Escape a `LIKE` needle: `%`, `_`, and `[` match literally when wrapped
/// in brackets.
#[must_use]
pub fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        match c {
            '%' | '_' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            other => out.push(other),
        }
    }
    out
}

/// Whitelisted single-argument scalar functions: host name to T-SQL
/// template with `{0}` standing for the argument.
static FUNCTION_TEMPLATES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("lower", "LOWER({0})"),
        ("upper", "UPPER({0})"),
        ("len", "LEN({0})"),
        ("length", "LEN({0})"),
        ("ltrim", "LTRIM({0})"),
        ("rtrim", "RTRIM({0})"),
        ("year", "YEAR({0})"),
        ("month", "MONTH({0})"),
        ("day", "DAY({0})"),
        ("hour", "DATEPART(HOUR, {0})"),
        ("minute", "DATEPART(MINUTE, {0})"),
        ("second", "DATEPART(SECOND, {0})"),
    ])
});

/// Date parts accepted by date_part/date_add/date_diff pushdown.
const DATE_PARTS: &[&str] = &[
    "year",
    "quarter",
    "month",
    "week",
    "day",
    "dayofyear",
    "hour",
    "minute",
    "second",
    "millisecond",
    "microsecond",
];

/// How much of the filter set a pushed clause covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Every filter is expressed in the pushed clause.
    Full,
    /// Some filters were dropped; the host re-applies all of them.
    Partial,
    /// Nothing was pushable.
    None,
}

/// Result of encoding a filter set.
#[derive(Debug, Clone)]
pub struct PushdownSql {
    /// The WHERE clause body, if anything was pushable.
    pub clause: Option<String>,
    /// Coverage of the original filters.
    pub coverage: Coverage,
}

/// Context for encoding: the bound columns and the table's key shape.
pub struct EncodeCtx<'a> {
    /// Columns in scan-binding order.
    pub columns: &'a [TableColumn],
    /// Rowid shape, when the table has a primary key.
    pub rowid: Option<&'a RowIdKind>,
}

impl EncodeCtx<'_> {
    fn column_name(&self, index: usize) -> Option<String> {
        self.columns.get(index).map(|c| quote_ident(&c.name))
    }
}

/// Encode a filter set (implicitly ANDed) into a WHERE clause body.
///
/// AND allows partial pushdown: unpushable conjuncts are dropped and the
/// coverage is reported as [`Coverage::Partial`] so the host engine keeps
/// its own filter. OR is all-or-nothing.
#[must_use]
pub fn encode_filters(filters: &[ScanFilter], ctx: &EncodeCtx<'_>) -> PushdownSql {
    if filters.is_empty() {
        return PushdownSql {
            clause: None,
            coverage: Coverage::Full,
        };
    }

    let mut pushed = Vec::with_capacity(filters.len());
    let mut dropped = 0usize;
    for filter in filters {
        match encode_filter(filter, ctx) {
            Some(sql) => pushed.push(sql),
            None => dropped += 1,
        }
    }

    if pushed.is_empty() {
        return PushdownSql {
            clause: None,
            coverage: Coverage::None,
        };
    }
    PushdownSql {
        clause: Some(pushed.join(" AND ")),
        coverage: if dropped == 0 {
            Coverage::Full
        } else {
            Coverage::Partial
        },
    }
}

/// Encode one filter node; `None` means unpushable.
#[must_use]
pub fn encode_filter(filter: &ScanFilter, ctx: &EncodeCtx<'_>) -> Option<String> {
    match filter {
        ScanFilter::Compare { column, op, value } => {
            encode_compare(*column, *op, value, ctx)
        }
        ScanFilter::IsNull { column, negated } => {
            let name = match column {
                ColRef::Column(i) => ctx.column_name(*i)?,
                // A rowid derives from PK columns, which are never NULL.
                ColRef::RowId => return None,
            };
            Some(if *negated {
                format!("{name} IS NOT NULL")
            } else {
                format!("{name} IS NULL")
            })
        }
        ScanFilter::InList { column, values } => {
            let name = match column {
                ColRef::Column(i) => ctx.column_name(*i)?,
                ColRef::RowId => return None,
            };
            if values.is_empty() {
                return None;
            }
            let rendered = values
                .iter()
                .map(literal)
                .collect::<Option<Vec<_>>>()?;
            Some(format!("{name} IN ({})", rendered.join(", ")))
        }
        ScanFilter::And(children) => {
            // Partial pushdown: drop unpushable conjuncts.
            let pushed: Vec<String> = children
                .iter()
                .filter_map(|child| encode_filter(child, ctx))
                .collect();
            if pushed.is_empty() {
                return None;
            }
            Some(format!("({})", pushed.join(" AND ")))
        }
        ScanFilter::Or(children) => {
            // All-or-nothing.
            if children.is_empty() {
                return None;
            }
            let pushed = children
                .iter()
                .map(|child| encode_filter(child, ctx))
                .collect::<Option<Vec<_>>>()?;
            Some(format!("({})", pushed.join(" OR ")))
        }
        ScanFilter::Expr(expr) => encode_expr(expr, ctx),
    }
}

fn encode_compare(
    column: ColRef,
    op: CompareOp,
    value: &FilterValue,
    ctx: &EncodeCtx<'_>,
) -> Option<String> {
    match (column, value) {
        (ColRef::Column(i), FilterValue::Value(v)) => {
            let name = ctx.column_name(i)?;
            let lit = literal(v)?;
            Some(format!("{name} {} {lit}", op.sql()))
        }
        (ColRef::RowId, FilterValue::RowId(rowid)) => {
            encode_rowid_compare(op, rowid, ctx)
        }
        _ => None,
    }
}

/// Rewrite a rowid predicate against the underlying primary key columns.
fn encode_rowid_compare(
    op: CompareOp,
    value: &RowIdValue,
    ctx: &EncodeCtx<'_>,
) -> Option<String> {
    let rowid = ctx.rowid?;
    match (rowid, value) {
        (RowIdKind::Scalar(pk), RowIdValue::Scalar(v)) => {
            let lit = literal(v)?;
            Some(format!("{} {} {lit}", quote_ident(pk), op.sql()))
        }
        (RowIdKind::Composite(pk_columns), RowIdValue::Struct(fields)) => {
            // Composite keys push only equality: the AND of per-column
            // equalities. Range comparisons over struct values have no
            // simple T-SQL rendering.
            if op != CompareOp::Eq {
                return None;
            }
            if pk_columns.len() != fields.len() {
                return None;
            }
            let conjuncts = pk_columns
                .iter()
                .map(|pk| {
                    let (_, v) = fields
                        .iter()
                        .find(|(name, _)| name.eq_ignore_ascii_case(pk))?;
                    let lit = literal(v)?;
                    Some(format!("{} = {lit}", quote_ident(pk)))
                })
                .collect::<Option<Vec<_>>>()?;
            Some(format!("({})", conjuncts.join(" AND ")))
        }
        _ => None,
    }
}

/// Encode a scalar/boolean expression; `None` means unpushable.
#[must_use]
pub fn encode_expr(expr: &PushExpr, ctx: &EncodeCtx<'_>) -> Option<String> {
    match expr {
        PushExpr::Column(ColRef::Column(i)) => ctx.column_name(*i),
        PushExpr::Column(ColRef::RowId) => match ctx.rowid? {
            RowIdKind::Scalar(pk) => Some(quote_ident(pk)),
            RowIdKind::Composite(_) => None,
        },
        PushExpr::Constant(value) => literal(value),
        PushExpr::Not(inner) => Some(format!("NOT ({})", encode_expr(inner, ctx)?)),
        PushExpr::Compare { left, op, right } => Some(format!(
            "{} {} {}",
            encode_expr(left, ctx)?,
            op.sql(),
            encode_expr(right, ctx)?
        )),
        PushExpr::Match {
            expr,
            needle,
            kind,
            case_insensitive,
        } => {
            let target = encode_expr(expr, ctx)?;
            let needle = if *case_insensitive {
                needle.to_lowercase()
            } else {
                needle.clone()
            };
            let escaped = escape_like(&needle);
            let pattern = match kind {
                MatchKind::Prefix => format!("{escaped}%"),
                MatchKind::Suffix => format!("%{escaped}"),
                MatchKind::Contains => format!("%{escaped}%"),
            };
            let target = if *case_insensitive {
                format!("LOWER({target})")
            } else {
                target
            };
            Some(format!("{target} LIKE {}", quote_string(&pattern)))
        }
        PushExpr::Func { name, args } => encode_func(name, args, ctx),
    }
}

fn date_part_name(expr: &PushExpr) -> Option<&str> {
    let PushExpr::Constant(SqlValue::String(part)) = expr else {
        return None;
    };
    let part = part.as_str();
    DATE_PARTS
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(part))
        .copied()
}

fn encode_func(name: &str, args: &[PushExpr], ctx: &EncodeCtx<'_>) -> Option<String> {
    let lowered = name.to_ascii_lowercase();

    if let Some(template) = FUNCTION_TEMPLATES.get(lowered.as_str()) {
        let [arg] = args else { return None };
        return Some(template.replace("{0}", &encode_expr(arg, ctx)?));
    }

    match lowered.as_str() {
        "date_part" | "datepart" => {
            let [part, arg] = args else { return None };
            let part = date_part_name(part)?;
            Some(format!(
                "DATEPART({}, {})",
                part.to_uppercase(),
                encode_expr(arg, ctx)?
            ))
        }
        "date_add" | "dateadd" => {
            let [part, number, arg] = args else { return None };
            let part = date_part_name(part)?;
            Some(format!(
                "DATEADD({}, {}, {})",
                part.to_uppercase(),
                encode_expr(number, ctx)?,
                encode_expr(arg, ctx)?
            ))
        }
        "date_diff" | "datediff" => {
            let [part, start, end] = args else { return None };
            let part = date_part_name(part)?;
            Some(format!(
                "DATEDIFF({}, {}, {})",
                part.to_uppercase(),
                encode_expr(start, ctx)?,
                encode_expr(end, ctx)?
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tds_types::{ColumnType, TypeId};

    fn columns() -> Vec<TableColumn> {
        ["id", "name", "d", "we]ird"]
            .iter()
            .enumerate()
            .map(|(i, name)| TableColumn {
                name: (*name).to_string(),
                ordinal: i + 1,
                ty: ColumnType::sized(TypeId::IntN, 4),
                nullable: true,
                identity: false,
                sql_type: "int".to_string(),
            })
            .collect()
    }

    fn ctx<'a>(columns: &'a [TableColumn], rowid: Option<&'a RowIdKind>) -> EncodeCtx<'a> {
        EncodeCtx { columns, rowid }
    }

    #[test]
    fn identifiers_and_strings_quote() {
        assert_eq!(quote_ident("plain"), "[plain]");
        assert_eq!(quote_ident("we]ird"), "[we]]ird]");
        assert_eq!(quote_string("O'Brien"), "N'O''Brien'");
    }

    #[test]
    fn literals_encode_per_type() {
        assert_eq!(literal(&SqlValue::Bool(true)).unwrap(), "1");
        assert_eq!(literal(&SqlValue::Int(-5)).unwrap(), "-5");
        assert_eq!(
            literal(&SqlValue::Decimal(rust_decimal::Decimal::new(1050, 2))).unwrap(),
            "10.50"
        );
        assert_eq!(
            literal(&SqlValue::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())).unwrap(),
            "'2024-03-09'"
        );
        assert_eq!(
            literal(&SqlValue::DateTime(
                NaiveDate::from_ymd_opt(2024, 3, 9)
                    .unwrap()
                    .and_hms_micro_opt(1, 2, 3, 456)
                    .unwrap()
            ))
            .unwrap(),
            "'2024-03-09 01:02:03.000456'"
        );
        assert_eq!(
            literal(&SqlValue::Binary(bytes::Bytes::from_static(&[0xDE, 0xAD]))).unwrap(),
            "0xDEAD"
        );
        assert!(literal(&SqlValue::Double(f64::NAN)).is_none());
    }

    #[test]
    fn like_escaping_brackets_metacharacters() {
        assert_eq!(escape_like("50%_off[now]"), "50[%][_]off[[]now]");
    }

    #[test]
    fn simple_comparisons_push_fully() {
        let cols = columns();
        let ctx = ctx(&cols, None);
        let filters = vec![
            ScanFilter::eq(0, SqlValue::Int(1)),
            ScanFilter::IsNull {
                column: ColRef::Column(1),
                negated: true,
            },
            ScanFilter::InList {
                column: ColRef::Column(3),
                values: vec![SqlValue::Int(1), SqlValue::Int(2)],
            },
        ];
        let result = encode_filters(&filters, &ctx);
        assert_eq!(result.coverage, Coverage::Full);
        assert_eq!(
            result.clause.unwrap(),
            "[id] = 1 AND [name] IS NOT NULL AND [we]]ird] IN (1, 2)"
        );
    }

    #[test]
    fn and_allows_partial_or_does_not() {
        let cols = columns();
        let ctx = ctx(&cols, None);

        // Column index 99 does not exist -> unpushable child.
        let and = ScanFilter::And(vec![
            ScanFilter::eq(0, SqlValue::Int(1)),
            ScanFilter::eq(99, SqlValue::Int(2)),
        ]);
        assert_eq!(encode_filter(&and, &ctx).unwrap(), "([id] = 1)");

        let or = ScanFilter::Or(vec![
            ScanFilter::eq(0, SqlValue::Int(1)),
            ScanFilter::eq(99, SqlValue::Int(2)),
        ]);
        assert!(encode_filter(&or, &ctx).is_none());

        // Top level: the dropped conjunct degrades coverage to Partial.
        let result = encode_filters(
            &[
                ScanFilter::eq(0, SqlValue::Int(1)),
                ScanFilter::eq(99, SqlValue::Int(2)),
            ],
            &ctx,
        );
        assert_eq!(result.coverage, Coverage::Partial);
        assert_eq!(result.clause.unwrap(), "[id] = 1");
    }

    #[test]
    fn rowid_rewrites_to_primary_key() {
        let cols = columns();
        let scalar = RowIdKind::Scalar("id".to_string());
        let ctx_scalar = ctx(&cols, Some(&scalar));

        let eq = ScanFilter::rowid(CompareOp::Eq, RowIdValue::Scalar(SqlValue::Int(7)));
        assert_eq!(encode_filter(&eq, &ctx_scalar).unwrap(), "[id] = 7");

        let gt = ScanFilter::rowid(CompareOp::Gt, RowIdValue::Scalar(SqlValue::Int(7)));
        assert_eq!(encode_filter(&gt, &ctx_scalar).unwrap(), "[id] > 7");

        let composite = RowIdKind::Composite(vec!["tenant".to_string(), "id".to_string()]);
        let ctx_composite = ctx(&cols, Some(&composite));
        let struct_eq = ScanFilter::rowid(
            CompareOp::Eq,
            RowIdValue::Struct(vec![
                ("tenant".to_string(), SqlValue::Int(3)),
                ("id".to_string(), SqlValue::Int(9)),
            ]),
        );
        assert_eq!(
            encode_filter(&struct_eq, &ctx_composite).unwrap(),
            "([tenant] = 3 AND [id] = 9)"
        );

        // Composite keys in non-equality are not pushable.
        let struct_gt = ScanFilter::rowid(
            CompareOp::Gt,
            RowIdValue::Struct(vec![
                ("tenant".to_string(), SqlValue::Int(3)),
                ("id".to_string(), SqlValue::Int(9)),
            ]),
        );
        assert!(encode_filter(&struct_gt, &ctx_composite).is_none());
    }

    #[test]
    fn expression_functions_use_template_table() {
        let cols = columns();
        let ctx = ctx(&cols, None);

        // year(d) = 2024
        let expr = ScanFilter::Expr(PushExpr::Compare {
            left: Box::new(PushExpr::Func {
                name: "year".to_string(),
                args: vec![PushExpr::Column(ColRef::Column(2))],
            }),
            op: CompareOp::Eq,
            right: Box::new(PushExpr::Constant(SqlValue::Int(2024))),
        });
        assert_eq!(encode_filter(&expr, &ctx).unwrap(), "YEAR([d]) = 2024");

        // date_part('month', d) with a valid part name
        let part = PushExpr::Func {
            name: "date_part".to_string(),
            args: vec![
                PushExpr::Constant(SqlValue::String("month".to_string())),
                PushExpr::Column(ColRef::Column(2)),
            ],
        };
        assert_eq!(encode_expr(&part, &ctx).unwrap(), "DATEPART(MONTH, [d])");

        // Unknown functions and parts stay on the host side.
        let unknown = PushExpr::Func {
            name: "soundex".to_string(),
            args: vec![PushExpr::Column(ColRef::Column(1))],
        };
        assert!(encode_expr(&unknown, &ctx).is_none());
    }

    #[test]
    fn match_kinds_render_like_patterns() {
        let cols = columns();
        let ctx = ctx(&cols, None);

        let prefix = PushExpr::Match {
            expr: Box::new(PushExpr::Column(ColRef::Column(1))),
            needle: "ab%".to_string(),
            kind: MatchKind::Prefix,
            case_insensitive: false,
        };
        assert_eq!(
            encode_expr(&prefix, &ctx).unwrap(),
            "[name] LIKE N'ab[%]%'"
        );

        let icontains = PushExpr::Match {
            expr: Box::new(PushExpr::Column(ColRef::Column(1))),
            needle: "NeEdLe".to_string(),
            kind: MatchKind::Contains,
            case_insensitive: true,
        };
        assert_eq!(
            encode_expr(&icontains, &ctx).unwrap(),
            "LOWER([name]) LIKE N'%needle%'"
        );
    }
}
