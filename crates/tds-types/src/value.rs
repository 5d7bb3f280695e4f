//! The decoded SQL value model.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single decoded column value.
///
/// This is the exchange currency between the wire decoders, the streaming
/// result pipeline, the bulk writer, and the pushdown literal encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// BIT.
    Bool(bool),
    /// TINYINT (unsigned on the wire).
    TinyInt(u8),
    /// SMALLINT.
    SmallInt(i16),
    /// INT.
    Int(i32),
    /// BIGINT.
    BigInt(i64),
    /// REAL.
    Float(f32),
    /// FLOAT.
    Double(f64),
    /// DECIMAL/NUMERIC/MONEY/SMALLMONEY.
    Decimal(Decimal),
    /// CHAR/VARCHAR/NCHAR/NVARCHAR (already transcoded to UTF-8).
    String(String),
    /// BINARY/VARBINARY.
    Binary(Bytes),
    /// UNIQUEIDENTIFIER.
    Uuid(Uuid),
    /// DATE.
    Date(NaiveDate),
    /// TIME(s).
    Time(NaiveTime),
    /// DATETIME/SMALLDATETIME/DATETIME2(s).
    DateTime(NaiveDateTime),
    /// DATETIMEOFFSET(s).
    DateTimeOffset(DateTime<FixedOffset>),
}

impl SqlValue {
    /// Whether the value is SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// A short name for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BIT",
            Self::TinyInt(_) => "TINYINT",
            Self::SmallInt(_) => "SMALLINT",
            Self::Int(_) => "INT",
            Self::BigInt(_) => "BIGINT",
            Self::Float(_) => "REAL",
            Self::Double(_) => "FLOAT",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "NVARCHAR",
            Self::Binary(_) => "VARBINARY",
            Self::Uuid(_) => "UNIQUEIDENTIFIER",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "DATETIME2",
            Self::DateTimeOffset(_) => "DATETIMEOFFSET",
        }
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
