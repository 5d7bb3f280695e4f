//! Logical type mapping between the host engine and SQL Server.

use tds_types::typeinfo::MAX_SENTINEL;
use tds_types::{ColumnType, TypeId};

use mssql_catalog::{RowIdKind, TableDetail};

use crate::error::BridgeError;

/// Host-engine logical types the integration exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalType {
    /// BOOLEAN.
    Boolean,
    /// UTINYINT (SQL Server TINYINT is unsigned).
    UTinyInt,
    /// SMALLINT.
    SmallInt,
    /// INTEGER.
    Integer,
    /// BIGINT.
    BigInt,
    /// FLOAT (4 bytes).
    Float,
    /// DOUBLE.
    Double,
    /// DECIMAL(precision, scale).
    Decimal(u8, u8),
    /// VARCHAR.
    Varchar,
    /// BLOB.
    Blob,
    /// UUID.
    Uuid,
    /// DATE.
    Date,
    /// TIME.
    Time,
    /// TIMESTAMP (microsecond precision).
    Timestamp,
    /// TIMESTAMP WITH TIME ZONE (microsecond precision).
    TimestampTz,
    /// STRUCT of named fields (composite rowid).
    Struct(Vec<(String, Box<LogicalType>)>),
}

/// Map a wire column type to the host logical type.
#[must_use]
pub fn logical_type(ty: &ColumnType) -> LogicalType {
    match ty.type_id {
        TypeId::Bit | TypeId::BitN => LogicalType::Boolean,
        TypeId::Int1 => LogicalType::UTinyInt,
        TypeId::Int2 => LogicalType::SmallInt,
        TypeId::Int4 => LogicalType::Integer,
        TypeId::Int8 => LogicalType::BigInt,
        TypeId::IntN => match ty.max_length {
            Some(1) => LogicalType::UTinyInt,
            Some(2) => LogicalType::SmallInt,
            Some(8) => LogicalType::BigInt,
            _ => LogicalType::Integer,
        },
        TypeId::Float4 => LogicalType::Float,
        TypeId::Float8 => LogicalType::Double,
        TypeId::FloatN => match ty.max_length {
            Some(4) => LogicalType::Float,
            _ => LogicalType::Double,
        },
        TypeId::Money | TypeId::MoneyN => LogicalType::Decimal(19, 4),
        TypeId::Money4 => LogicalType::Decimal(10, 4),
        TypeId::DecimalN | TypeId::NumericN => {
            LogicalType::Decimal(ty.precision.unwrap_or(18), ty.scale.unwrap_or(0))
        }
        TypeId::NVarChar | TypeId::NChar | TypeId::BigVarChar | TypeId::BigChar => {
            LogicalType::Varchar
        }
        TypeId::BigVarBinary | TypeId::BigBinary => LogicalType::Blob,
        TypeId::Guid => LogicalType::Uuid,
        TypeId::Date => LogicalType::Date,
        TypeId::Time => LogicalType::Time,
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN | TypeId::DateTime2 => {
            LogicalType::Timestamp
        }
        TypeId::DateTimeOffset => LogicalType::TimestampTz,
    }
}

/// The T-SQL column type used when the host engine creates tables
/// (CTAS, `COPY ... CREATE_TABLE`).
pub fn sql_server_type(logical: &LogicalType) -> Result<String, BridgeError> {
    Ok(match logical {
        LogicalType::Boolean => "BIT".to_string(),
        LogicalType::UTinyInt => "TINYINT".to_string(),
        LogicalType::SmallInt => "SMALLINT".to_string(),
        LogicalType::Integer => "INT".to_string(),
        LogicalType::BigInt => "BIGINT".to_string(),
        LogicalType::Float => "REAL".to_string(),
        LogicalType::Double => "FLOAT".to_string(),
        LogicalType::Decimal(precision, scale) => format!("DECIMAL({precision},{scale})"),
        LogicalType::Varchar => "NVARCHAR(MAX)".to_string(),
        LogicalType::Blob => "VARBINARY(MAX)".to_string(),
        LogicalType::Uuid => "UNIQUEIDENTIFIER".to_string(),
        LogicalType::Date => "DATE".to_string(),
        LogicalType::Time => "TIME(6)".to_string(),
        LogicalType::Timestamp => "DATETIME2(6)".to_string(),
        LogicalType::TimestampTz => "DATETIMEOFFSET(6)".to_string(),
        LogicalType::Struct(_) => {
            return Err(BridgeError::Binding(
                "STRUCT columns cannot be created on SQL Server".to_string(),
            ));
        }
    })
}

/// The wire type used when the host engine bulk-loads a freshly created
/// column of this logical type.
#[must_use]
pub fn wire_type(logical: &LogicalType) -> ColumnType {
    match logical {
        LogicalType::Boolean => ColumnType::sized(TypeId::BitN, 1),
        LogicalType::UTinyInt => ColumnType::sized(TypeId::IntN, 1),
        LogicalType::SmallInt => ColumnType::sized(TypeId::IntN, 2),
        LogicalType::Integer => ColumnType::sized(TypeId::IntN, 4),
        LogicalType::BigInt => ColumnType::sized(TypeId::IntN, 8),
        LogicalType::Float => ColumnType::sized(TypeId::FloatN, 4),
        LogicalType::Double => ColumnType::sized(TypeId::FloatN, 8),
        LogicalType::Decimal(precision, scale) => ColumnType::decimal(*precision, *scale),
        LogicalType::Varchar => ColumnType::sized(TypeId::NVarChar, MAX_SENTINEL),
        LogicalType::Blob => ColumnType::sized(TypeId::BigVarBinary, MAX_SENTINEL),
        LogicalType::Uuid => ColumnType::plain(TypeId::Guid),
        LogicalType::Date => ColumnType::plain(TypeId::Date),
        LogicalType::Time => ColumnType::temporal(TypeId::Time, 6),
        LogicalType::Timestamp => ColumnType::temporal(TypeId::DateTime2, 6),
        LogicalType::TimestampTz => ColumnType::temporal(TypeId::DateTimeOffset, 6),
        LogicalType::Struct(_) => ColumnType::sized(TypeId::NVarChar, MAX_SENTINEL),
    }
}

/// The rowid logical type of a table: the key column's type when scalar,
/// a struct of the key columns when composite.
pub fn rowid_logical_type(detail: &TableDetail) -> Result<Option<LogicalType>, BridgeError> {
    let Some(kind) = detail.rowid_kind() else {
        return Ok(None);
    };
    match kind {
        RowIdKind::Scalar(column) => {
            let column = detail.column(&column).ok_or_else(|| {
                BridgeError::Binding(format!("primary key column `{column}` not found"))
            })?;
            Ok(Some(logical_type(&column.ty)))
        }
        RowIdKind::Composite(columns) => {
            let fields = columns
                .iter()
                .map(|name| {
                    let column = detail.column(name).ok_or_else(|| {
                        BridgeError::Binding(format!("primary key column `{name}` not found"))
                    })?;
                    Ok((name.clone(), Box::new(logical_type(&column.ty))))
                })
                .collect::<Result<Vec<_>, BridgeError>>()?;
            Ok(Some(LogicalType::Struct(fields)))
        }
    }
}
