//! Discovery queries over the server's system views and their row
//! conversions.
//!
//! The loader executing these lives with the connection pool; this module
//! owns the SQL text and the mapping from result rows into the catalog
//! model, including the sys.types name to wire-type translation.

use tds_types::typeinfo::MAX_SENTINEL;
use tds_types::{ColumnType, SqlValue, TypeId};

use crate::error::CatalogError;
use crate::model::{PrimaryKey, TableColumn, TableEntry};

/// Quote a T-SQL string literal, doubling embedded quotes. `N`-prefixed
/// so names survive in any collation.
fn quote_literal(s: &str) -> String {
    format!("N'{}'", s.replace('\'', "''"))
}

/// Schemas, minus the fixed system schemas and role-owned placeholders.
pub const SCHEMAS_SQL: &str = "SELECT s.name FROM sys.schemas s \
     WHERE s.schema_id NOT BETWEEN 16384 AND 16399 \
     AND s.name NOT IN (N'sys', N'INFORMATION_SCHEMA', N'guest') \
     ORDER BY s.name";

/// User tables and views of one schema.
#[must_use]
pub fn tables_sql(schema: &str) -> String {
    format!(
        "SELECT o.name, o.type FROM sys.objects o \
         JOIN sys.schemas s ON o.schema_id = s.schema_id \
         WHERE s.name = {} AND o.type IN ('U', 'V') \
         ORDER BY o.name",
        quote_literal(schema)
    )
}

/// Columns of one table, joined to their type names.
#[must_use]
pub fn columns_sql(schema: &str, table: &str) -> String {
    format!(
        "SELECT c.name, c.column_id, t.name, c.max_length, c.precision, \
         c.scale, c.is_nullable, c.is_identity \
         FROM sys.columns c \
         JOIN sys.types t ON c.user_type_id = t.user_type_id \
         JOIN sys.objects o ON c.object_id = o.object_id \
         JOIN sys.schemas s ON o.schema_id = s.schema_id \
         WHERE s.name = {} AND o.name = {} \
         ORDER BY c.column_id",
        quote_literal(schema),
        quote_literal(table)
    )
}

/// Primary key columns of one table, in key-ordinal order.
#[must_use]
pub fn primary_key_sql(schema: &str, table: &str) -> String {
    format!(
        "SELECT c.name FROM sys.indexes i \
         JOIN sys.index_columns ic \
           ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
         JOIN sys.columns c \
           ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
         JOIN sys.objects o ON i.object_id = o.object_id \
         JOIN sys.schemas s ON o.schema_id = s.schema_id \
         WHERE i.is_primary_key = 1 AND s.name = {} AND o.name = {} \
         ORDER BY ic.key_ordinal",
        quote_literal(schema),
        quote_literal(table)
    )
}

fn as_str(value: &SqlValue) -> Result<&str, CatalogError> {
    match value {
        SqlValue::String(s) => Ok(s),
        other => Err(CatalogError::Load(format!(
            "expected string, got {}",
            other.kind()
        ))),
    }
}

fn as_i64(value: &SqlValue) -> Result<i64, CatalogError> {
    match value {
        SqlValue::TinyInt(v) => Ok(i64::from(*v)),
        SqlValue::SmallInt(v) => Ok(i64::from(*v)),
        SqlValue::Int(v) => Ok(i64::from(*v)),
        SqlValue::BigInt(v) => Ok(*v),
        other => Err(CatalogError::Load(format!(
            "expected integer, got {}",
            other.kind()
        ))),
    }
}

fn as_bool(value: &SqlValue) -> Result<bool, CatalogError> {
    match value {
        SqlValue::Bool(v) => Ok(*v),
        other => as_i64(other).map(|v| v != 0),
    }
}

/// Convert `tables_sql` rows.
pub fn tables_from_rows(rows: &[Vec<SqlValue>]) -> Result<Vec<TableEntry>, CatalogError> {
    rows.iter()
        .map(|row| {
            if row.len() < 2 {
                return Err(CatalogError::Load("short tables row".to_string()));
            }
            Ok(TableEntry {
                name: as_str(&row[0])?.to_string(),
                is_view: as_str(&row[1])?.trim() == "V",
            })
        })
        .collect()
}

/// Convert `SCHEMAS_SQL` rows.
pub fn schemas_from_rows(rows: &[Vec<SqlValue>]) -> Result<Vec<String>, CatalogError> {
    rows.iter()
        .map(|row| {
            row.first()
                .ok_or_else(|| CatalogError::Load("empty schemas row".to_string()))
                .and_then(as_str)
                .map(str::to_string)
        })
        .collect()
}

/// Convert `columns_sql` rows; unsupported types fail with the column name.
pub fn columns_from_rows(
    qualified_table: &str,
    rows: &[Vec<SqlValue>],
) -> Result<Vec<TableColumn>, CatalogError> {
    rows.iter()
        .map(|row| {
            if row.len() < 8 {
                return Err(CatalogError::Load("short columns row".to_string()));
            }
            let name = as_str(&row[0])?.to_string();
            let ordinal = as_i64(&row[1])? as usize;
            let sql_type = as_str(&row[2])?.to_string();
            let max_length = as_i64(&row[3])?;
            let precision = as_i64(&row[4])? as u8;
            let scale = as_i64(&row[5])? as u8;
            let nullable = as_bool(&row[6])?;
            let identity = as_bool(&row[7])?;

            let ty = column_type_from_sql(&sql_type, max_length, precision, scale)
                .ok_or_else(|| CatalogError::UnsupportedColumnType {
                    table: qualified_table.to_string(),
                    column: name.clone(),
                    sql_type: sql_type.clone(),
                })?;

            Ok(TableColumn {
                name,
                ordinal,
                ty,
                nullable,
                identity,
                sql_type,
            })
        })
        .collect()
}

/// Convert `primary_key_sql` rows.
pub fn primary_key_from_rows(
    rows: &[Vec<SqlValue>],
) -> Result<Option<PrimaryKey>, CatalogError> {
    if rows.is_empty() {
        return Ok(None);
    }
    let columns = rows
        .iter()
        .map(|row| {
            row.first()
                .ok_or_else(|| CatalogError::Load("empty key row".to_string()))
                .and_then(as_str)
                .map(str::to_string)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(PrimaryKey { columns }))
}

/// Map a sys.types name plus length/precision/scale to a wire type.
///
/// `max_length` follows sys.columns conventions: bytes, with -1 marking
/// MAX, and UTF-16 byte counts for `nchar`/`nvarchar`.
#[must_use]
pub fn column_type_from_sql(
    sql_type: &str,
    max_length: i64,
    precision: u8,
    scale: u8,
) -> Option<ColumnType> {
    let sized = |raw: i64| -> u32 {
        if raw < 0 { MAX_SENTINEL } else { raw as u32 }
    };

    let ty = match sql_type.to_ascii_lowercase().as_str() {
        "tinyint" => ColumnType::sized(TypeId::IntN, 1),
        "smallint" => ColumnType::sized(TypeId::IntN, 2),
        "int" => ColumnType::sized(TypeId::IntN, 4),
        "bigint" => ColumnType::sized(TypeId::IntN, 8),
        "bit" => ColumnType::sized(TypeId::BitN, 1),
        "real" => ColumnType::sized(TypeId::FloatN, 4),
        "float" => ColumnType::sized(TypeId::FloatN, 8),
        "money" => ColumnType::sized(TypeId::MoneyN, 8),
        "smallmoney" => ColumnType::sized(TypeId::MoneyN, 4),
        "decimal" | "numeric" => ColumnType::decimal(precision, scale),
        "char" => ColumnType::sized(TypeId::BigChar, sized(max_length)),
        "varchar" => ColumnType::sized(TypeId::BigVarChar, sized(max_length)),
        "nchar" => ColumnType::sized(TypeId::NChar, sized(max_length)),
        "nvarchar" => ColumnType::sized(TypeId::NVarChar, sized(max_length)),
        "binary" => ColumnType::sized(TypeId::BigBinary, sized(max_length)),
        "varbinary" => ColumnType::sized(TypeId::BigVarBinary, sized(max_length)),
        "uniqueidentifier" => ColumnType::plain(TypeId::Guid),
        "date" => ColumnType::plain(TypeId::Date),
        "time" => ColumnType::temporal(TypeId::Time, scale),
        "datetime2" => ColumnType::temporal(TypeId::DateTime2, scale),
        "datetimeoffset" => ColumnType::temporal(TypeId::DateTimeOffset, scale),
        "datetime" => ColumnType::sized(TypeId::DateTimeN, 8),
        "smalldatetime" => ColumnType::sized(TypeId::DateTimeN, 4),
        _ => return None,
    };
    Some(ty)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn literals_are_escaped() {
        assert!(tables_sql("we'ird").contains("N'we''ird'"));
    }

    #[test]
    fn type_mapping_basics() {
        assert_eq!(
            column_type_from_sql("int", 4, 10, 0).unwrap().type_id,
            TypeId::IntN
        );
        let dt2 = column_type_from_sql("datetime2", 8, 27, 3).unwrap();
        assert_eq!(dt2.type_id, TypeId::DateTime2);
        assert_eq!(dt2.scale, Some(3));

        let nvarchar_max = column_type_from_sql("nvarchar", -1, 0, 0).unwrap();
        assert!(nvarchar_max.is_plp());
    }

    #[test]
    fn unsupported_types_map_to_none() {
        for ty in ["xml", "sql_variant", "geography", "geometry", "hierarchyid"] {
            assert!(column_type_from_sql(ty, -1, 0, 0).is_none(), "{ty}");
        }
    }

    #[test]
    fn unsupported_column_error_names_the_column() {
        let rows = vec![vec![
            SqlValue::String("payload".into()),
            SqlValue::Int(1),
            SqlValue::String("xml".into()),
            SqlValue::SmallInt(-1),
            SqlValue::TinyInt(0),
            SqlValue::TinyInt(0),
            SqlValue::Bool(true),
            SqlValue::Bool(false),
        ]];
        let err = columns_from_rows("dbo.Docs", &rows).unwrap_err();
        let CatalogError::UnsupportedColumnType { table, column, sql_type } = err else {
            panic!("wrong error kind");
        };
        assert_eq!(table, "dbo.Docs");
        assert_eq!(column, "payload");
        assert_eq!(sql_type, "xml");
    }

    #[test]
    fn pk_rows_convert_in_order() {
        let rows = vec![
            vec![SqlValue::String("tenant".into())],
            vec![SqlValue::String("id".into())],
        ];
        let pk = primary_key_from_rows(&rows).unwrap().unwrap();
        assert_eq!(pk.columns, vec!["tenant".to_string(), "id".to_string()]);
        assert!(primary_key_from_rows(&[]).unwrap().is_none());
    }
}
