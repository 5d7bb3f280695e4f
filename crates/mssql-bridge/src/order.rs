//! ORDER BY / TOP N pushdown.
//!
//! Disabled by default; gated by the `order_pushdown` setting or a
//! per-catalog attach option. The optimizer hook looks one or two levels
//! above a catalog scan (skipping a projection) for an order or top-N
//! node and asks [`try_push`] which prefix of the ordering the server can
//! produce.
//!
//! SQL Server sorts NULLs first ascending and last descending, with no
//! NULLS FIRST/LAST syntax; a requested ordering that disagrees on a
//! nullable column stops the pushed prefix at that point.

use mssql_catalog::TableColumn;

use crate::sqlgen::{EncodeCtx, encode_expr};
use crate::expr::{ColRef, PushExpr};

/// Requested placement of NULLs for one ordering expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrder {
    /// Host-engine default (NULLS LAST for ascending, FIRST for
    /// descending).
    Default,
    /// NULLs sort before all values.
    NullsFirst,
    /// NULLs sort after all values.
    NullsLast,
}

/// An ordering expression: a direct column or a single-argument
/// whitelisted function over one.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderExpr {
    /// Direct column reference.
    Column(usize),
    /// `func(column)` where `func` is in the pushdown whitelist.
    Func {
        /// Host function name.
        name: String,
        /// Argument column.
        column: usize,
    },
}

/// One ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    /// Ordered expression.
    pub expr: OrderExpr,
    /// Ascending or descending.
    pub ascending: bool,
    /// Requested NULL placement.
    pub nulls: NullOrder,
}

/// Outcome of an ORDER BY pushdown attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderPushdown {
    /// Every item pushed: the emitted SQL gains `TOP n`/`ORDER BY` and the
    /// host drops its sort (and top-N) node.
    Full {
        /// Rendered `ORDER BY` fragments, in order.
        fragments: Vec<String>,
        /// TOP N, when a limit node sat above the sort.
        limit: Option<u64>,
    },
    /// Only a prefix pushed: the fragment pre-sorts on the server but the
    /// host's sort stays to finish ordering. No TOP is emitted.
    Partial {
        /// Rendered fragments for the pushed prefix.
        fragments: Vec<String>,
        /// How many leading items were pushed.
        pushed: usize,
    },
    /// Nothing pushable.
    None,
}

/// Whether the server's NULL placement for this direction matches the
/// requested placement on a nullable column.
fn nulls_compatible(column: &TableColumn, ascending: bool, nulls: NullOrder) -> bool {
    if !column.nullable {
        return true;
    }
    // Server behavior: NULLs first when ascending, last when descending.
    let server_first = ascending;
    match nulls {
        NullOrder::NullsFirst => server_first,
        NullOrder::NullsLast => !server_first,
        // The host default is the opposite convention (NULLS LAST when
        // ascending), so a nullable column under Default only matches
        // descending order.
        NullOrder::Default => !ascending,
    }
}

/// Attempt to push an ordering (and optional TOP N) into the scan.
#[must_use]
pub fn try_push(
    items: &[OrderItem],
    limit: Option<u64>,
    ctx: &EncodeCtx<'_>,
) -> OrderPushdown {
    if items.is_empty() {
        return OrderPushdown::None;
    }

    let mut fragments = Vec::with_capacity(items.len());
    for item in items {
        let column_index = match &item.expr {
            OrderExpr::Column(i) => *i,
            OrderExpr::Func { column, .. } => *column,
        };
        let Some(column) = ctx.columns.get(column_index) else {
            break;
        };
        if !nulls_compatible(column, item.ascending, item.nulls) {
            tracing::debug!(
                column = %column.name,
                ascending = item.ascending,
                "NULL ordering mismatch stops pushed prefix"
            );
            break;
        }

        let rendered = match &item.expr {
            OrderExpr::Column(i) => encode_expr(&PushExpr::Column(ColRef::Column(*i)), ctx),
            OrderExpr::Func { name, column } => encode_expr(
                &PushExpr::Func {
                    name: name.clone(),
                    args: vec![PushExpr::Column(ColRef::Column(*column))],
                },
                ctx,
            ),
        };
        let Some(rendered) = rendered else {
            break;
        };

        let direction = if item.ascending { "ASC" } else { "DESC" };
        fragments.push(format!("{rendered} {direction}"));
    }

    if fragments.is_empty() {
        OrderPushdown::None
    } else if fragments.len() == items.len() {
        OrderPushdown::Full { fragments, limit }
    } else {
        let pushed = fragments.len();
        OrderPushdown::Partial { fragments, pushed }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_types::{ColumnType, TypeId};

    fn column(name: &str, nullable: bool) -> TableColumn {
        TableColumn {
            name: name.to_string(),
            ordinal: 0,
            ty: ColumnType::sized(TypeId::IntN, 4),
            nullable,
            identity: false,
            sql_type: "int".to_string(),
        }
    }

    fn asc(i: usize) -> OrderItem {
        OrderItem {
            expr: OrderExpr::Column(i),
            ascending: true,
            nulls: NullOrder::Default,
        }
    }

    #[test]
    fn non_nullable_columns_push_fully_with_top() {
        let cols = vec![column("d", false), column("x", false)];
        let ctx = EncodeCtx {
            columns: &cols,
            rowid: None,
        };
        let result = try_push(&[asc(0), asc(1)], Some(10), &ctx);
        assert_eq!(
            result,
            OrderPushdown::Full {
                fragments: vec!["[d] ASC".to_string(), "[x] ASC".to_string()],
                limit: Some(10),
            }
        );
    }

    #[test]
    fn nullable_ascending_default_stops_prefix() {
        // Ascending + host-default NULLS LAST disagrees with the server's
        // NULLS-first ascending order.
        let cols = vec![column("a", false), column("b", true), column("c", false)];
        let ctx = EncodeCtx {
            columns: &cols,
            rowid: None,
        };
        let result = try_push(&[asc(0), asc(1), asc(2)], Some(5), &ctx);
        let OrderPushdown::Partial { fragments, pushed } = result else {
            panic!("expected partial push, got {result:?}");
        };
        assert_eq!(pushed, 1);
        assert_eq!(fragments, vec!["[a] ASC".to_string()]);
    }

    #[test]
    fn nullable_descending_default_is_compatible() {
        let cols = vec![column("b", true)];
        let ctx = EncodeCtx {
            columns: &cols,
            rowid: None,
        };
        let item = OrderItem {
            expr: OrderExpr::Column(0),
            ascending: false,
            nulls: NullOrder::Default,
        };
        assert_eq!(
            try_push(&[item], None, &ctx),
            OrderPushdown::Full {
                fragments: vec!["[b] DESC".to_string()],
                limit: None,
            }
        );
    }

    #[test]
    fn explicit_null_order_is_honored() {
        let cols = vec![column("b", true)];
        let ctx = EncodeCtx {
            columns: &cols,
            rowid: None,
        };
        let nulls_first_asc = OrderItem {
            expr: OrderExpr::Column(0),
            ascending: true,
            nulls: NullOrder::NullsFirst,
        };
        assert!(matches!(
            try_push(std::slice::from_ref(&nulls_first_asc), None, &ctx),
            OrderPushdown::Full { .. }
        ));

        let nulls_last_asc = OrderItem {
            nulls: NullOrder::NullsLast,
            ..nulls_first_asc
        };
        assert_eq!(try_push(&[nulls_last_asc], None, &ctx), OrderPushdown::None);
    }

    #[test]
    fn function_ordering_uses_whitelist() {
        let cols = vec![column("d", false)];
        let ctx = EncodeCtx {
            columns: &cols,
            rowid: None,
        };
        let item = OrderItem {
            expr: OrderExpr::Func {
                name: "year".to_string(),
                column: 0,
            },
            ascending: true,
            nulls: NullOrder::Default,
        };
        assert_eq!(
            try_push(&[item], Some(3), &ctx),
            OrderPushdown::Full {
                fragments: vec!["YEAR([d]) ASC".to_string()],
                limit: Some(3),
            }
        );

        let unknown = OrderItem {
            expr: OrderExpr::Func {
                name: "soundex".to_string(),
                column: 0,
            },
            ascending: true,
            nulls: NullOrder::Default,
        };
        assert_eq!(try_push(&[unknown], None, &ctx), OrderPushdown::None);
    }
}
