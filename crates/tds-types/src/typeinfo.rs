//! TDS data type identifiers and per-column type descriptors.

use crate::collation::Collation;
use crate::error::TypeError;

/// TDS data type identifiers as they appear in COLMETADATA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// 8-bit unsigned integer (TINYINT).
    Int1 = 0x30,
    /// Bit (boolean).
    Bit = 0x32,
    /// 16-bit signed integer (SMALLINT).
    Int2 = 0x34,
    /// 32-bit signed integer (INT).
    Int4 = 0x38,
    /// 64-bit signed integer (BIGINT).
    Int8 = 0x7F,
    /// Nullable integer wrapper (INTN).
    IntN = 0x26,
    /// Nullable bit wrapper (BITN).
    BitN = 0x68,
    /// 32-bit float (REAL).
    Float4 = 0x3B,
    /// 64-bit float (FLOAT).
    Float8 = 0x3E,
    /// Nullable float wrapper (FLTN).
    FloatN = 0x6D,
    /// 8-byte money (19,4).
    Money = 0x3C,
    /// 4-byte money (10,4).
    Money4 = 0x7A,
    /// Nullable money wrapper (MONEYN).
    MoneyN = 0x6E,
    /// Legacy datetime (days since 1900 + 1/300s ticks).
    DateTime = 0x3D,
    /// Legacy small datetime (days since 1900 + minutes).
    DateTime4 = 0x3A,
    /// Nullable legacy datetime wrapper (DATETIMN).
    DateTimeN = 0x6F,
    /// Decimal with precision/scale (DECIMALN).
    DecimalN = 0x6A,
    /// Numeric with precision/scale (NUMERICN).
    NumericN = 0x6C,
    /// GUID (UNIQUEIDENTIFIER).
    Guid = 0x24,
    /// Large variable-length ANSI string (BIGVARCHAR).
    BigVarChar = 0xA7,
    /// Large fixed-length ANSI string (BIGCHAR).
    BigChar = 0xAF,
    /// Variable-length Unicode string (NVARCHAR).
    NVarChar = 0xE7,
    /// Fixed-length Unicode string (NCHAR).
    NChar = 0xEF,
    /// Large variable-length binary (BIGVARBINARY).
    BigVarBinary = 0xA5,
    /// Large fixed-length binary (BIGBINARY).
    BigBinary = 0xAD,
    /// Date, 3 bytes of days since 0001-01-01.
    Date = 0x28,
    /// Time with scale 0..=7.
    Time = 0x29,
    /// Datetime2 with scale 0..=7.
    DateTime2 = 0x2A,
    /// Datetimeoffset with scale 0..=7.
    DateTimeOffset = 0x2B,
}

impl TypeId {
    /// Map a raw type token to a supported type.
    ///
    /// Types the integration does not handle (XML, SQL_VARIANT, UDT,
    /// geography/geometry, legacy TEXT/NTEXT/IMAGE) yield
    /// [`TypeError::UnsupportedType`] so that binding can name the column.
    pub fn from_u8(value: u8) -> Result<Self, TypeError> {
        match value {
            0x30 => Ok(Self::Int1),
            0x32 => Ok(Self::Bit),
            0x34 => Ok(Self::Int2),
            0x38 => Ok(Self::Int4),
            0x7F => Ok(Self::Int8),
            0x26 => Ok(Self::IntN),
            0x68 => Ok(Self::BitN),
            0x3B => Ok(Self::Float4),
            0x3E => Ok(Self::Float8),
            0x6D => Ok(Self::FloatN),
            0x3C => Ok(Self::Money),
            0x7A => Ok(Self::Money4),
            0x6E => Ok(Self::MoneyN),
            0x3D => Ok(Self::DateTime),
            0x3A => Ok(Self::DateTime4),
            0x6F => Ok(Self::DateTimeN),
            0x6A => Ok(Self::DecimalN),
            0x6C => Ok(Self::NumericN),
            0x24 => Ok(Self::Guid),
            0xA7 => Ok(Self::BigVarChar),
            0xAF => Ok(Self::BigChar),
            0xE7 => Ok(Self::NVarChar),
            0xEF => Ok(Self::NChar),
            0xA5 => Ok(Self::BigVarBinary),
            0xAD => Ok(Self::BigBinary),
            0x28 => Ok(Self::Date),
            0x29 => Ok(Self::Time),
            0x2A => Ok(Self::DateTime2),
            0x2B => Ok(Self::DateTimeOffset),
            other => Err(TypeError::UnsupportedType { type_id: other }),
        }
    }

    /// Fixed wire size in bytes, for types without a length prefix.
    #[must_use]
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Whether values carry a 1-byte length prefix (nullable wrappers and
    /// short variable types).
    #[must_use]
    pub const fn is_byte_len(&self) -> bool {
        matches!(
            self,
            Self::IntN
                | Self::BitN
                | Self::FloatN
                | Self::MoneyN
                | Self::DateTimeN
                | Self::DecimalN
                | Self::NumericN
                | Self::Guid
                | Self::Date
                | Self::Time
                | Self::DateTime2
                | Self::DateTimeOffset
        )
    }

    /// Whether values carry a 2-byte length prefix (long strings/binary).
    #[must_use]
    pub const fn is_short_len(&self) -> bool {
        matches!(
            self,
            Self::BigVarChar
                | Self::BigChar
                | Self::NVarChar
                | Self::NChar
                | Self::BigVarBinary
                | Self::BigBinary
        )
    }

    /// Whether this is a character type (ANSI or Unicode).
    #[must_use]
    pub const fn is_string(&self) -> bool {
        matches!(
            self,
            Self::BigVarChar | Self::BigChar | Self::NVarChar | Self::NChar
        )
    }

    /// Whether this is a UTF-16 (Unicode) character type.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        matches!(self, Self::NVarChar | Self::NChar)
    }

    /// Whether this type's wire size depends on its scale.
    #[must_use]
    pub const fn is_scaled_temporal(&self) -> bool {
        matches!(self, Self::Time | Self::DateTime2 | Self::DateTimeOffset)
    }
}

/// Per-column type descriptor, assembled from COLMETADATA TypeInfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    /// The TDS type.
    pub type_id: TypeId,
    /// Declared maximum length for variable-length types.
    /// `0xFFFF` marks a MAX (PLP-encoded) column.
    pub max_length: Option<u32>,
    /// Precision for decimal/numeric.
    pub precision: Option<u8>,
    /// Scale for decimal/numeric and scaled temporal types.
    pub scale: Option<u8>,
    /// Collation for character types.
    pub collation: Option<Collation>,
}

/// Sentinel length marking an NVARCHAR(MAX)/VARBINARY(MAX) column.
pub const MAX_SENTINEL: u32 = 0xFFFF;

impl ColumnType {
    /// Descriptor for a fixed-size or nullable-wrapper type.
    #[must_use]
    pub fn plain(type_id: TypeId) -> Self {
        Self {
            type_id,
            max_length: None,
            precision: None,
            scale: None,
            collation: None,
        }
    }

    /// Descriptor for a variable-length string/binary type.
    #[must_use]
    pub fn sized(type_id: TypeId, max_length: u32) -> Self {
        Self {
            max_length: Some(max_length),
            ..Self::plain(type_id)
        }
    }

    /// Descriptor for a decimal/numeric column.
    #[must_use]
    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self {
            precision: Some(precision),
            scale: Some(scale),
            ..Self::plain(TypeId::NumericN)
        }
    }

    /// Descriptor for a scaled temporal column.
    #[must_use]
    pub fn temporal(type_id: TypeId, scale: u8) -> Self {
        Self {
            scale: Some(scale),
            ..Self::plain(type_id)
        }
    }

    /// Whether this column is PLP (MAX) encoded.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        self.max_length == Some(MAX_SENTINEL) && self.type_id.is_short_len()
    }

    /// Effective temporal scale, defaulting to 7 when unset.
    #[must_use]
    pub fn temporal_scale(&self) -> u8 {
        self.scale.unwrap_or(7)
    }
}

/// Wire size of the time portion for a given scale.
///
/// Per MS-TDS: scale 0..=2 use 3 bytes, 3..=4 use 4 bytes, 5..=7 use 5.
#[must_use]
pub const fn time_bytes_for_scale(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

/// Storage bytes for a decimal magnitude at the given precision.
#[must_use]
pub const fn decimal_bytes_for_precision(precision: u8) -> u8 {
    match precision {
        0..=9 => 4,
        10..=19 => 8,
        20..=28 => 12,
        _ => 16,
    }
}
