//! TDS binary encoding for SQL values.
//!
//! Used by the bulk-load writer: values are encoded in the same row format
//! the server uses for result sets, per the column's declared type.

use bytes::{BufMut, BytesMut};
use chrono::{NaiveDate, NaiveTime, Offset, Timelike};

use crate::error::TypeError;
use crate::typeinfo::{
    ColumnType, TypeId, decimal_bytes_for_precision, time_bytes_for_scale,
};
use crate::value::SqlValue;

/// Encode one column value into `buf` according to its type descriptor.
pub fn encode_value(
    buf: &mut BytesMut,
    ty: &ColumnType,
    value: &SqlValue,
) -> Result<(), TypeError> {
    if value.is_null() {
        return encode_null(buf, ty);
    }

    match (ty.type_id, value) {
        (TypeId::Bit | TypeId::BitN, SqlValue::Bool(v)) => {
            buf.put_u8(1);
            buf.put_u8(u8::from(*v));
        }
        (TypeId::Int1 | TypeId::IntN, SqlValue::TinyInt(v)) => {
            buf.put_u8(1);
            buf.put_u8(*v);
        }
        (TypeId::Int2 | TypeId::IntN, SqlValue::SmallInt(v)) => {
            buf.put_u8(2);
            buf.put_i16_le(*v);
        }
        (TypeId::Int4 | TypeId::IntN, SqlValue::Int(v)) => {
            buf.put_u8(4);
            buf.put_i32_le(*v);
        }
        (TypeId::Int8 | TypeId::IntN, SqlValue::BigInt(v)) => {
            buf.put_u8(8);
            buf.put_i64_le(*v);
        }
        (TypeId::Float4 | TypeId::FloatN, SqlValue::Float(v)) => {
            buf.put_u8(4);
            buf.put_f32_le(*v);
        }
        (TypeId::Float8 | TypeId::FloatN, SqlValue::Double(v)) => {
            buf.put_u8(8);
            buf.put_f64_le(*v);
        }
        (TypeId::DecimalN | TypeId::NumericN, SqlValue::Decimal(d)) => {
            encode_decimal(buf, ty, d)?;
        }
        (TypeId::Money | TypeId::MoneyN, SqlValue::Decimal(d)) => {
            let mut scaled = *d;
            scaled.rescale(4);
            let raw = i64::try_from(scaled.mantissa()).map_err(|_| TypeError::InvalidData {
                what: "MONEY",
                detail: format!("value {d} out of range"),
            })?;
            buf.put_u8(8);
            buf.put_i32_le((raw >> 32) as i32);
            buf.put_u32_le((raw & 0xFFFF_FFFF) as u32);
        }
        (TypeId::Guid, SqlValue::Uuid(u)) => {
            buf.put_u8(16);
            encode_uuid(buf, *u);
        }
        (TypeId::NVarChar | TypeId::NChar, SqlValue::String(s)) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            let byte_len = units.len() * 2;
            if ty.is_plp() {
                encode_plp(buf, byte_len, |buf| {
                    for unit in &units {
                        buf.put_u16_le(*unit);
                    }
                });
            } else {
                if byte_len >= 0xFFFF {
                    return Err(TypeError::ValueTooLarge {
                        got: byte_len,
                        max: 0xFFFE,
                    });
                }
                buf.put_u16_le(byte_len as u16);
                for unit in units {
                    buf.put_u16_le(unit);
                }
            }
        }
        (TypeId::BigVarChar | TypeId::BigChar, SqlValue::String(s)) => {
            // ANSI columns are loaded as their raw bytes; non-ASCII content
            // targets the column collation's code page on the server, so we
            // keep bulk loads to UTF-8-compatible collations.
            let data = s.as_bytes();
            if ty.is_plp() {
                encode_plp(buf, data.len(), |buf| buf.put_slice(data));
            } else {
                if data.len() >= 0xFFFF {
                    return Err(TypeError::ValueTooLarge {
                        got: data.len(),
                        max: 0xFFFE,
                    });
                }
                buf.put_u16_le(data.len() as u16);
                buf.put_slice(data);
            }
        }
        (TypeId::BigVarBinary | TypeId::BigBinary, SqlValue::Binary(b)) => {
            if ty.is_plp() {
                encode_plp(buf, b.len(), |buf| buf.put_slice(b));
            } else {
                if b.len() >= 0xFFFF {
                    return Err(TypeError::ValueTooLarge {
                        got: b.len(),
                        max: 0xFFFE,
                    });
                }
                buf.put_u16_le(b.len() as u16);
                buf.put_slice(b);
            }
        }
        (TypeId::Date, SqlValue::Date(d)) => {
            buf.put_u8(3);
            encode_date(buf, *d);
        }
        (TypeId::Time, SqlValue::Time(t)) => {
            let scale = ty.temporal_scale();
            buf.put_u8(time_bytes_for_scale(scale) as u8);
            encode_time(buf, *t, scale);
        }
        (TypeId::DateTime2, SqlValue::DateTime(dt)) => {
            let scale = ty.temporal_scale();
            buf.put_u8((time_bytes_for_scale(scale) + 3) as u8);
            encode_time(buf, dt.time(), scale);
            encode_date(buf, dt.date());
        }
        (TypeId::DateTimeOffset, SqlValue::DateTimeOffset(dto)) => {
            let scale = ty.temporal_scale();
            buf.put_u8((time_bytes_for_scale(scale) + 5) as u8);
            let utc = dto.naive_utc();
            encode_time(buf, utc.time(), scale);
            encode_date(buf, utc.date());
            let offset_minutes = (dto.offset().fix().local_minus_utc() / 60) as i16;
            buf.put_i16_le(offset_minutes);
        }
        (TypeId::DateTime | TypeId::DateTimeN, SqlValue::DateTime(dt)) => {
            buf.put_u8(8);
            let epoch = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default();
            let days = dt.date().signed_duration_since(epoch).num_days() as i32;
            let ns_midnight = dt
                .time()
                .signed_duration_since(NaiveTime::MIN)
                .num_nanoseconds()
                .unwrap_or(0) as u64;
            let ticks = (ns_midnight * 3 / 10_000_000) as u32;
            buf.put_i32_le(days);
            buf.put_u32_le(ticks);
        }
        (_, value) => {
            return Err(TypeError::InvalidData {
                what: "column value",
                detail: format!(
                    "cannot encode {} into type 0x{:02X}",
                    value.kind(),
                    ty.type_id as u8
                ),
            });
        }
    }

    Ok(())
}

/// Encode the NULL marker appropriate for the column's type.
fn encode_null(buf: &mut BytesMut, ty: &ColumnType) -> Result<(), TypeError> {
    if ty.is_plp() {
        buf.put_u64_le(0xFFFF_FFFF_FFFF_FFFF);
    } else if ty.type_id.is_short_len() {
        buf.put_u16_le(0xFFFF);
    } else if ty.type_id.is_byte_len() {
        buf.put_u8(0);
    } else {
        // Fixed-size types have no NULL representation on the wire.
        return Err(TypeError::UnexpectedNull);
    }
    Ok(())
}

/// Encode a DECIMAL/NUMERIC value: 1-byte length, sign byte, magnitude.
fn encode_decimal(
    buf: &mut BytesMut,
    ty: &ColumnType,
    d: &rust_decimal::Decimal,
) -> Result<(), TypeError> {
    let precision = ty.precision.unwrap_or(18);
    let scale = u32::from(ty.scale.unwrap_or(0));
    let magnitude_len = decimal_bytes_for_precision(precision) as usize;

    let mut normalized = *d;
    normalized.rescale(scale);
    let mantissa = normalized.mantissa().unsigned_abs();
    let raw = mantissa.to_le_bytes();
    if raw[magnitude_len..].iter().any(|b| *b != 0) {
        return Err(TypeError::InvalidData {
            what: "DECIMAL",
            detail: format!("value {d} exceeds precision {precision}"),
        });
    }

    buf.put_u8((1 + magnitude_len) as u8);
    buf.put_u8(u8::from(!normalized.is_sign_negative()));
    buf.put_slice(&raw[..magnitude_len]);
    Ok(())
}

/// Encode a GUID in SQL Server's mixed-endian layout.
pub fn encode_uuid(buf: &mut BytesMut, u: uuid::Uuid) {
    let b = u.as_bytes();
    buf.put_slice(&[b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6]]);
    buf.put_slice(&b[8..16]);
}

/// Encode a DATE as 3 little-endian bytes of days since 0001-01-01.
pub fn encode_date(buf: &mut BytesMut, d: NaiveDate) {
    let base = NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or_default();
    let days = d.signed_duration_since(base).num_days().max(0) as u32;
    buf.put_slice(&days.to_le_bytes()[..3]);
}

/// Encode a TIME at the given scale.
pub fn encode_time(buf: &mut BytesMut, t: NaiveTime, scale: u8) {
    let total_ns = u64::from(t.num_seconds_from_midnight()) * 1_000_000_000
        + u64::from(t.nanosecond());
    let ticks = total_ns / 10u64.pow(9 - u32::from(scale.min(7)));
    let len = time_bytes_for_scale(scale);
    buf.put_slice(&ticks.to_le_bytes()[..len]);
}

/// Encode a PLP value as a single chunk plus terminator.
fn encode_plp<F: FnOnce(&mut BytesMut)>(buf: &mut BytesMut, byte_len: usize, write: F) {
    buf.put_u64_le(byte_len as u64);
    if byte_len > 0 {
        buf.put_u32_le(byte_len as u32);
        write(buf);
    }
    buf.put_u32_le(0);
}
