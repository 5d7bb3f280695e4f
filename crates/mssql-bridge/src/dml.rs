//! T-SQL statement generation for scans, DML, and DDL.

use tds_types::SqlValue;

use crate::error::BridgeError;
use crate::sqlgen::{literal, quote_ident, quote_string};
use crate::types_map::{LogicalType, sql_server_type};

/// `[schema].[table]`.
#[must_use]
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Build the SELECT for a scan.
///
/// `order` carries the pushed ORDER BY fragments; `top` is emitted only
/// with it (a TOP without ORDER BY has no defined row set).
#[must_use]
pub fn build_select(
    qualified: &str,
    projection: &[&str],
    where_clause: Option<&str>,
    order: Option<&[String]>,
    top: Option<u64>,
) -> String {
    let mut sql = String::from("SELECT ");
    if let Some(top) = top {
        sql.push_str(&format!("TOP {top} "));
    }
    if projection.is_empty() {
        sql.push('*');
    } else {
        let cols: Vec<String> = projection.iter().map(|c| quote_ident(c)).collect();
        sql.push_str(&cols.join(", "));
    }
    sql.push_str(" FROM ");
    sql.push_str(qualified);
    if let Some(clause) = where_clause {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
    if let Some(fragments) = order {
        if !fragments.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&fragments.join(", "));
        }
    }
    sql
}

fn render_value(value: &SqlValue) -> Result<String, BridgeError> {
    literal(value).ok_or_else(|| {
        BridgeError::Usage(format!(
            "{} value has no SQL literal representation",
            value.kind()
        ))
    })
}

/// Multi-row `INSERT ... VALUES`.
pub fn insert_sql(
    qualified: &str,
    columns: &[&str],
    rows: &[Vec<SqlValue>],
) -> Result<String, BridgeError> {
    if rows.is_empty() {
        return Err(BridgeError::Usage("INSERT with no rows".to_string()));
    }
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != columns.len() {
            return Err(BridgeError::Usage(format!(
                "INSERT row has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        let rendered = row
            .iter()
            .map(render_value)
            .collect::<Result<Vec<_>, _>>()?;
        tuples.push(format!("({})", rendered.join(", ")));
    }
    Ok(format!(
        "INSERT INTO {qualified} ({}) VALUES {}",
        quoted.join(", "),
        tuples.join(", ")
    ))
}

/// `UPDATE ... SET ... WHERE ...`.
pub fn update_sql(
    qualified: &str,
    assignments: &[(&str, SqlValue)],
    where_clause: &str,
) -> Result<String, BridgeError> {
    if assignments.is_empty() {
        return Err(BridgeError::Usage("UPDATE with no assignments".to_string()));
    }
    let sets = assignments
        .iter()
        .map(|(name, value)| Ok(format!("{} = {}", quote_ident(name), render_value(value)?)))
        .collect::<Result<Vec<_>, BridgeError>>()?;
    Ok(format!(
        "UPDATE {qualified} SET {} WHERE {where_clause}",
        sets.join(", ")
    ))
}

/// `DELETE FROM ... WHERE ...`.
#[must_use]
pub fn delete_sql(qualified: &str, where_clause: &str) -> String {
    format!("DELETE FROM {qualified} WHERE {where_clause}")
}

/// `CREATE TABLE`, optionally guarded for idempotence.
///
/// With `if_not_exists`, the statement becomes a no-op batch when the
/// object already exists, returning zero affected rows and no error.
pub fn create_table_sql(
    schema: &str,
    table: &str,
    columns: &[(String, LogicalType, bool)],
    if_not_exists: bool,
) -> Result<String, BridgeError> {
    if columns.is_empty() {
        return Err(BridgeError::Usage("CREATE TABLE with no columns".to_string()));
    }
    let qualified = qualified_name(schema, table);
    let defs = columns
        .iter()
        .map(|(name, logical, nullable)| {
            let ty = sql_server_type(logical)?;
            let null = if *nullable { "NULL" } else { "NOT NULL" };
            Ok(format!("{} {ty} {null}", quote_ident(name)))
        })
        .collect::<Result<Vec<_>, BridgeError>>()?;
    let create = format!("CREATE TABLE {qualified} ({})", defs.join(", "));

    if if_not_exists {
        Ok(format!(
            "IF OBJECT_ID({}, 'U') IS NULL BEGIN {create} END",
            quote_string(&format!("{schema}.{table}"))
        ))
    } else {
        Ok(create)
    }
}

/// `CREATE SCHEMA`, optionally guarded for idempotence.
#[must_use]
pub fn create_schema_sql(schema: &str, if_not_exists: bool) -> String {
    let create = format!("CREATE SCHEMA {}", quote_ident(schema));
    if if_not_exists {
        // CREATE SCHEMA must be the only statement in its batch; the
        // guard wraps it in EXEC.
        format!(
            "IF SCHEMA_ID({}) IS NULL EXEC ({})",
            quote_string(schema),
            quote_string(&create)
        )
    } else {
        create
    }
}

/// `DROP TABLE`, optionally tolerant of a missing object.
#[must_use]
pub fn drop_table_sql(schema: &str, table: &str, if_exists: bool) -> String {
    let qualified = qualified_name(schema, table);
    if if_exists {
        format!("DROP TABLE IF EXISTS {qualified}")
    } else {
        format!("DROP TABLE {qualified}")
    }
}

/// `DROP SCHEMA`.
#[must_use]
pub fn drop_schema_sql(schema: &str, if_exists: bool) -> String {
    if if_exists {
        format!("DROP SCHEMA IF EXISTS {}", quote_ident(schema))
    } else {
        format!("DROP SCHEMA {}", quote_ident(schema))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn select_with_order_and_top() {
        let sql = build_select(
            "[dbo].[t]",
            &["d", "v"],
            Some("YEAR([d]) = 2024"),
            Some(&["[d] ASC".to_string()]),
            Some(10),
        );
        assert_eq!(
            sql,
            "SELECT TOP 10 [d], [v] FROM [dbo].[t] WHERE YEAR([d]) = 2024 ORDER BY [d] ASC"
        );
    }

    #[test]
    fn select_star_without_pushdown() {
        let sql = build_select("[dbo].[t]", &[], None, None, None);
        assert_eq!(sql, "SELECT * FROM [dbo].[t]");
    }

    #[test]
    fn insert_renders_literals() {
        let sql = insert_sql(
            "[dbo].[t]",
            &["id", "name"],
            &[
                vec![SqlValue::Int(1), SqlValue::String("a'b".to_string())],
                vec![SqlValue::Int(2), SqlValue::Null],
            ],
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO [dbo].[t] ([id], [name]) VALUES (1, N'a''b'), (2, NULL)"
        );
    }

    #[test]
    fn insert_arity_mismatch_fails() {
        let err = insert_sql("[dbo].[t]", &["id"], &[vec![]]).unwrap_err();
        assert!(matches!(err, BridgeError::Usage(_)));
    }

    #[test]
    fn update_and_delete() {
        let sql = update_sql(
            "[dbo].[t]",
            &[("name", SqlValue::String("x".to_string()))],
            "[id] = 5",
        )
        .unwrap();
        assert_eq!(sql, "UPDATE [dbo].[t] SET [name] = N'x' WHERE [id] = 5");

        assert_eq!(
            delete_sql("[dbo].[t]", "[id] > 3"),
            "DELETE FROM [dbo].[t] WHERE [id] > 3"
        );
    }

    #[test]
    fn create_table_with_guard() {
        let sql = create_table_sql(
            "dbo",
            "t",
            &[
                ("id".to_string(), LogicalType::Integer, false),
                ("v".to_string(), LogicalType::Varchar, true),
            ],
            true,
        )
        .unwrap();
        assert_eq!(
            sql,
            "IF OBJECT_ID(N'dbo.t', 'U') IS NULL BEGIN \
             CREATE TABLE [dbo].[t] ([id] INT NOT NULL, [v] NVARCHAR(MAX) NULL) END"
        );
    }

    #[test]
    fn create_schema_guard_wraps_exec() {
        let sql = create_schema_sql("staging", true);
        assert_eq!(
            sql,
            "IF SCHEMA_ID(N'staging') IS NULL EXEC (N'CREATE SCHEMA [staging]')"
        );
    }
}
