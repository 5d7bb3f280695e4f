//! TDS binary decoding for SQL values.
//!
//! Decoders consume from a `&mut &[u8]` cursor. When the cursor does not
//! hold the complete value, [`TypeError::Incomplete`] is returned and the
//! cursor must be considered poisoned; the caller re-runs the decode from a
//! saved position after more bytes arrive. This is what makes the token
//! parser resumable across packet boundaries.

use bytes::{Buf, Bytes};
use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::collation::Collation;
use crate::error::TypeError;
use crate::typeinfo::{ColumnType, TypeId, time_bytes_for_scale};
use crate::value::SqlValue;

/// PLP NULL sentinel (8 bytes of 0xFF).
const PLP_NULL: u64 = 0xFFFF_FFFF_FFFF_FFFF;
/// PLP unknown-length sentinel; chunks are streamed until a zero terminator.
const PLP_UNKNOWN_LEN: u64 = 0xFFFF_FFFF_FFFF_FFFE;

fn need(src: &&[u8], n: usize) -> Result<(), TypeError> {
    if src.len() < n {
        return Err(TypeError::incomplete(n, src.len()));
    }
    Ok(())
}

/// Decode one column value according to its type descriptor.
///
/// This is the single entry point used by both ROW and NBCROW decoding, so
/// the column's scale is consulted on every path.
pub fn decode_value(src: &mut &[u8], ty: &ColumnType) -> Result<SqlValue, TypeError> {
    match ty.type_id {
        TypeId::Bit => {
            need(src, 1)?;
            Ok(SqlValue::Bool(src.get_u8() != 0))
        }
        TypeId::Int1 => {
            need(src, 1)?;
            Ok(SqlValue::TinyInt(src.get_u8()))
        }
        TypeId::Int2 => {
            need(src, 2)?;
            Ok(SqlValue::SmallInt(src.get_i16_le()))
        }
        TypeId::Int4 => {
            need(src, 4)?;
            Ok(SqlValue::Int(src.get_i32_le()))
        }
        TypeId::Int8 => {
            need(src, 8)?;
            Ok(SqlValue::BigInt(src.get_i64_le()))
        }
        TypeId::Float4 => {
            need(src, 4)?;
            Ok(SqlValue::Float(src.get_f32_le()))
        }
        TypeId::Float8 => {
            need(src, 8)?;
            Ok(SqlValue::Double(src.get_f64_le()))
        }
        TypeId::Money => {
            need(src, 8)?;
            Ok(SqlValue::Decimal(decode_money8(src)))
        }
        TypeId::Money4 => {
            need(src, 4)?;
            Ok(SqlValue::Decimal(Decimal::new(
                i64::from(src.get_i32_le()),
                4,
            )))
        }
        TypeId::DateTime => {
            need(src, 8)?;
            decode_legacy_datetime(src)
        }
        TypeId::DateTime4 => {
            need(src, 4)?;
            decode_small_datetime(src)
        }
        TypeId::IntN => decode_intn(src),
        TypeId::BitN => decode_byte_len(src, |v| {
            if v.len() == 1 {
                Ok(SqlValue::Bool(v[0] != 0))
            } else {
                Err(invalid("BITN", format!("length {}", v.len())))
            }
        }),
        TypeId::FloatN => decode_byte_len(src, |mut v| match v.len() {
            4 => Ok(SqlValue::Float(v.get_f32_le())),
            8 => Ok(SqlValue::Double(v.get_f64_le())),
            n => Err(invalid("FLTN", format!("length {n}"))),
        }),
        TypeId::MoneyN => decode_byte_len(src, |mut v| match v.len() {
            4 => Ok(SqlValue::Decimal(Decimal::new(i64::from(v.get_i32_le()), 4))),
            8 => Ok(SqlValue::Decimal(decode_money8(&mut v))),
            n => Err(invalid("MONEYN", format!("length {n}"))),
        }),
        TypeId::DateTimeN => decode_byte_len(src, |mut v| match v.len() {
            4 => decode_small_datetime(&mut v),
            8 => decode_legacy_datetime(&mut v),
            n => Err(invalid("DATETIMN", format!("length {n}"))),
        }),
        TypeId::DecimalN | TypeId::NumericN => decode_decimal(src, ty.scale.unwrap_or(0)),
        TypeId::Guid => decode_guid(src),
        TypeId::Date => decode_byte_len(src, |mut v| {
            if v.len() != 3 {
                return Err(invalid("DATE", format!("length {}", v.len())));
            }
            Ok(SqlValue::Date(read_date3(&mut v)?))
        }),
        TypeId::Time => {
            let scale = ty.temporal_scale();
            decode_byte_len(src, move |mut v| {
                let time_len = v.len();
                let ticks = read_time_ticks(&mut v, time_len)?;
                Ok(SqlValue::Time(ticks_to_time(ticks, scale)?))
            })
        }
        TypeId::DateTime2 => {
            let scale = ty.temporal_scale();
            decode_byte_len(src, move |mut v| {
                let time_len = v.len().checked_sub(3).ok_or_else(|| {
                    invalid("DATETIME2", format!("length {}", v.len()))
                })?;
                let ticks = read_time_ticks(&mut v, time_len)?;
                let time = ticks_to_time(ticks, scale)?;
                let date = read_date3(&mut v)?;
                Ok(SqlValue::DateTime(date.and_time(time)))
            })
        }
        TypeId::DateTimeOffset => {
            let scale = ty.temporal_scale();
            decode_byte_len(src, move |mut v| {
                let time_len = v.len().checked_sub(5).ok_or_else(|| {
                    invalid("DATETIMEOFFSET", format!("length {}", v.len()))
                })?;
                let ticks = read_time_ticks(&mut v, time_len)?;
                let time = ticks_to_time(ticks, scale)?;
                let date = read_date3(&mut v)?;
                let offset_minutes = v.get_i16_le();
                let offset = FixedOffset::east_opt(i32::from(offset_minutes) * 60)
                    .ok_or_else(|| invalid("DATETIMEOFFSET", format!("offset {offset_minutes}")))?;
                // The wire carries UTC; the offset is display information.
                let dto = offset.from_utc_datetime(&date.and_time(time));
                Ok(SqlValue::DateTimeOffset(dto))
            })
        }
        TypeId::NVarChar | TypeId::NChar => {
            if ty.is_plp() {
                decode_plp(src, |data| utf16le_to_string(&data).map(SqlValue::String))
            } else {
                decode_short_len(src, |data| utf16le_to_string(&data).map(SqlValue::String))
            }
        }
        TypeId::BigVarChar | TypeId::BigChar => {
            let collation = ty.collation.unwrap_or_default();
            if ty.is_plp() {
                decode_plp(src, move |data| ansi_to_string(&data, collation))
            } else {
                decode_short_len(src, move |data| ansi_to_string(&data, collation))
            }
        }
        TypeId::BigVarBinary | TypeId::BigBinary => {
            if ty.is_plp() {
                decode_plp(src, |data| Ok(SqlValue::Binary(data)))
            } else {
                decode_short_len(src, |data| Ok(SqlValue::Binary(data)))
            }
        }
    }
}

fn invalid(what: &'static str, detail: String) -> TypeError {
    TypeError::InvalidData { what, detail }
}

/// Decode a value prefixed by a 1-byte length; length 0 is NULL.
fn decode_byte_len<F>(src: &mut &[u8], decode: F) -> Result<SqlValue, TypeError>
where
    F: FnOnce(&[u8]) -> Result<SqlValue, TypeError>,
{
    need(src, 1)?;
    let len = src[0] as usize;
    need(src, 1 + len)?;
    src.advance(1);
    if len == 0 {
        return Ok(SqlValue::Null);
    }
    let (value, rest) = src.split_at(len);
    let result = decode(value);
    *src = rest;
    result
}

/// Decode a value prefixed by a 2-byte length; 0xFFFF is NULL.
fn decode_short_len<F>(src: &mut &[u8], decode: F) -> Result<SqlValue, TypeError>
where
    F: FnOnce(Bytes) -> Result<SqlValue, TypeError>,
{
    need(src, 2)?;
    let len = u16::from_le_bytes([src[0], src[1]]) as usize;
    if len == 0xFFFF {
        src.advance(2);
        return Ok(SqlValue::Null);
    }
    need(src, 2 + len)?;
    src.advance(2);
    let data = Bytes::copy_from_slice(&src[..len]);
    src.advance(len);
    decode(data)
}

/// Decode a PLP (MAX-typed) value: 8-byte total length, then 4-byte-prefixed
/// chunks until a zero terminator.
fn decode_plp<F>(src: &mut &[u8], decode: F) -> Result<SqlValue, TypeError>
where
    F: FnOnce(Bytes) -> Result<SqlValue, TypeError>,
{
    need(src, 8)?;
    let total = u64::from_le_bytes([
        src[0], src[1], src[2], src[3], src[4], src[5], src[6], src[7],
    ]);
    if total == PLP_NULL {
        src.advance(8);
        return Ok(SqlValue::Null);
    }

    // Walk chunks on a scratch cursor first so that an incomplete value
    // leaves `src` untouched for the retry.
    let mut scan = &src[8..];
    let capacity = if total == PLP_UNKNOWN_LEN { 0 } else { total as usize };
    let mut data = Vec::with_capacity(capacity);
    loop {
        need(&scan, 4)?;
        let chunk = u32::from_le_bytes([scan[0], scan[1], scan[2], scan[3]]) as usize;
        scan.advance(4);
        if chunk == 0 {
            break;
        }
        need(&scan, chunk)?;
        data.extend_from_slice(&scan[..chunk]);
        scan.advance(chunk);
    }
    *src = scan;
    decode(Bytes::from(data))
}

fn decode_intn(src: &mut &[u8]) -> Result<SqlValue, TypeError> {
    decode_byte_len(src, |mut v| match v.len() {
        1 => Ok(SqlValue::TinyInt(v.get_u8())),
        2 => Ok(SqlValue::SmallInt(v.get_i16_le())),
        4 => Ok(SqlValue::Int(v.get_i32_le())),
        8 => Ok(SqlValue::BigInt(v.get_i64_le())),
        n => Err(invalid("INTN", format!("length {n}"))),
    })
}

/// DECIMAL/NUMERIC: 1 sign byte (0 negative, 1 positive) then 4/8/12/16
/// little-endian magnitude bytes; value = magnitude / 10^scale.
fn decode_decimal(src: &mut &[u8], scale: u8) -> Result<SqlValue, TypeError> {
    decode_byte_len(src, move |v| {
        let (sign, magnitude) = v
            .split_first()
            .ok_or_else(|| invalid("DECIMAL", "empty value".to_string()))?;
        if magnitude.len() > 16 {
            return Err(invalid("DECIMAL", format!("magnitude {} bytes", magnitude.len())));
        }
        let mut raw = [0u8; 16];
        raw[..magnitude.len()].copy_from_slice(magnitude);
        let unsigned = u128::from_le_bytes(raw);
        if unsigned > i128::MAX as u128 {
            return Err(invalid("DECIMAL", "magnitude overflow".to_string()));
        }
        let mut dec = Decimal::from_i128_with_scale(unsigned as i128, u32::from(scale));
        if *sign == 0 {
            dec.set_sign_negative(true);
        }
        Ok(SqlValue::Decimal(dec))
    })
}

/// MONEY: two little-endian 4-byte halves, high word first, scaled by 10^4.
fn decode_money8(src: &mut impl Buf) -> Decimal {
    let high = src.get_i32_le();
    let low = src.get_u32_le();
    let raw = (i64::from(high) << 32) | i64::from(low);
    Decimal::new(raw, 4)
}

/// UNIQUEIDENTIFIER: first three groups little-endian, last 8 bytes as-is.
fn decode_guid(src: &mut &[u8]) -> Result<SqlValue, TypeError> {
    decode_byte_len(src, |v| {
        if v.len() != 16 {
            return Err(invalid("UNIQUEIDENTIFIER", format!("length {}", v.len())));
        }
        let bytes = [
            v[3], v[2], v[1], v[0], v[5], v[4], v[7], v[6], v[8], v[9], v[10], v[11], v[12], v[13],
            v[14], v[15],
        ];
        Ok(SqlValue::Uuid(Uuid::from_bytes(bytes)))
    })
}

/// Legacy DATETIME: signed days since 1900-01-01 + 1/300-second ticks.
fn decode_legacy_datetime(src: &mut impl Buf) -> Result<SqlValue, TypeError> {
    let days = src.get_i32_le();
    let ticks = src.get_u32_le();
    let date = epoch_1900()
        .checked_add_signed(chrono::Duration::days(i64::from(days)))
        .ok_or_else(|| invalid("DATETIME", format!("days {days}")))?;
    let total_ns = u64::from(ticks) * 10_000_000 / 3;
    let secs = (total_ns / 1_000_000_000) as u32;
    let nanos = (total_ns % 1_000_000_000) as u32;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or_else(|| invalid("DATETIME", format!("ticks {ticks}")))?;
    Ok(SqlValue::DateTime(date.and_time(time)))
}

/// SMALLDATETIME: unsigned days since 1900-01-01 + minutes.
fn decode_small_datetime(src: &mut impl Buf) -> Result<SqlValue, TypeError> {
    let days = src.get_u16_le();
    let minutes = src.get_u16_le();
    let date = epoch_1900()
        .checked_add_signed(chrono::Duration::days(i64::from(days)))
        .ok_or_else(|| invalid("SMALLDATETIME", format!("days {days}")))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minutes) * 60, 0)
        .ok_or_else(|| invalid("SMALLDATETIME", format!("minutes {minutes}")))?;
    Ok(SqlValue::DateTime(date.and_time(time)))
}

fn epoch_1900() -> NaiveDate {
    // Constant is always valid.
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default()
}

/// Read a 3-byte little-endian day count since 0001-01-01.
fn read_date3(src: &mut &[u8]) -> Result<NaiveDate, TypeError> {
    need(src, 3)?;
    let days =
        u32::from(src[0]) | (u32::from(src[1]) << 8) | (u32::from(src[2]) << 16);
    src.advance(3);
    let base = NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or_default();
    base.checked_add_signed(chrono::Duration::days(i64::from(days)))
        .ok_or_else(|| invalid("DATE", format!("days {days}")))
}

/// Read `len` bytes of little-endian time ticks.
fn read_time_ticks(src: &mut &[u8], len: usize) -> Result<u64, TypeError> {
    if !(3..=5).contains(&len) {
        return Err(invalid("TIME", format!("length {len}")));
    }
    need(src, len)?;
    let mut raw = [0u8; 8];
    raw[..len].copy_from_slice(&src[..len]);
    src.advance(len);
    Ok(u64::from_le_bytes(raw))
}

/// Convert scale-dependent ticks to a time of day.
///
/// At scale `s` each tick is `10^(7-s)` hundred-nanosecond units: a scale-0
/// value of 3600 is 01:00:00, not a sub-second fraction.
fn ticks_to_time(ticks: u64, scale: u8) -> Result<NaiveTime, TypeError> {
    let exponent = 9 - u32::from(scale.min(7));
    let nanos = ticks
        .checked_mul(10u64.pow(exponent))
        .ok_or_else(|| invalid("TIME", format!("ticks {ticks} at scale {scale}")))?;
    let secs = (nanos / 1_000_000_000) as u32;
    let nano_part = (nanos % 1_000_000_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nano_part)
        .ok_or_else(|| invalid("TIME", format!("ticks {ticks} at scale {scale}")))
}

/// Decode UTF-16LE bytes into a string.
pub fn utf16le_to_string(data: &[u8]) -> Result<String, TypeError> {
    if data.len() % 2 != 0 {
        return Err(invalid("UTF-16", format!("odd length {}", data.len())));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| invalid("UTF-16", e.to_string()))
}

fn ansi_to_string(data: &[u8], collation: Collation) -> Result<SqlValue, TypeError> {
    // ASCII fast path; otherwise transcode via the collation's code page.
    if data.is_ascii() {
        return Ok(SqlValue::String(
            String::from_utf8_lossy(data).into_owned(),
        ));
    }
    let (decoded, _, had_errors) = collation.encoding().decode(data);
    if had_errors {
        return Err(invalid("VARCHAR", "undecodable bytes for collation".to_string()));
    }
    Ok(SqlValue::String(decoded.into_owned()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::typeinfo::MAX_SENTINEL;

    fn dt2(scale: u8) -> ColumnType {
        ColumnType::temporal(TypeId::DateTime2, scale)
    }

    #[test]
    fn int4_decodes() {
        let mut src: &[u8] = &[42, 0, 0, 0];
        let v = decode_value(&mut src, &ColumnType::plain(TypeId::Int4)).unwrap();
        assert_eq!(v, SqlValue::Int(42));
        assert!(src.is_empty());
    }

    #[test]
    fn intn_null_and_values() {
        let mut src: &[u8] = &[0];
        assert_eq!(
            decode_value(&mut src, &ColumnType::plain(TypeId::IntN)).unwrap(),
            SqlValue::Null
        );
        let mut src: &[u8] = &[8, 1, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            decode_value(&mut src, &ColumnType::plain(TypeId::IntN)).unwrap(),
            SqlValue::BigInt(1)
        );
    }

    #[test]
    fn incomplete_value_reports_incomplete() {
        let mut src: &[u8] = &[42, 0];
        let err = decode_value(&mut src, &ColumnType::plain(TypeId::Int4)).unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn nvarchar_decodes_and_null() {
        // "AB" UTF-16LE with 4-byte length
        let mut src: &[u8] = &[4, 0, 0x41, 0x00, 0x42, 0x00];
        let ty = ColumnType::sized(TypeId::NVarChar, 100);
        assert_eq!(
            decode_value(&mut src, &ty).unwrap(),
            SqlValue::String("AB".into())
        );

        let mut src: &[u8] = &[0xFF, 0xFF];
        assert_eq!(decode_value(&mut src, &ty).unwrap(), SqlValue::Null);
    }

    #[test]
    fn time_scale_zero_is_whole_seconds() {
        // 3600 ticks at scale 0 must decode to 01:00:00.
        let mut src: &[u8] = &[3, 0x10, 0x0E, 0x00];
        let ty = ColumnType::temporal(TypeId::Time, 0);
        let v = decode_value(&mut src, &ty).unwrap();
        assert_eq!(
            v,
            SqlValue::Time(NaiveTime::from_hms_opt(1, 0, 0).unwrap())
        );
    }

    #[test]
    fn datetime2_scale_zero() {
        // 2020-04-04 12:12:48 at scale 0: ticks = 43968, days since 0001-01-01 = 737518.
        let ticks: u64 = 12 * 3600 + 12 * 60 + 48;
        let days = NaiveDate::from_ymd_opt(2020, 4, 4)
            .unwrap()
            .signed_duration_since(NaiveDate::from_ymd_opt(1, 1, 1).unwrap())
            .num_days() as u32;
        let mut raw = vec![6u8];
        raw.extend_from_slice(&ticks.to_le_bytes()[..3]);
        raw.extend_from_slice(&days.to_le_bytes()[..3]);
        let mut src: &[u8] = &raw;
        let v = decode_value(&mut src, &dt2(0)).unwrap();
        assert_eq!(
            v,
            SqlValue::DateTime(
                NaiveDate::from_ymd_opt(2020, 4, 4)
                    .unwrap()
                    .and_hms_opt(12, 12, 48)
                    .unwrap()
            )
        );
    }

    #[test]
    fn datetime2_microseconds_truncate_to_scale() {
        // 12:00:00.123456 encoded at each scale must decode back to the
        // microseconds truncated to that scale.
        let micros_full: u64 = (12 * 3600) * 1_000_000 + 123_456;
        for scale in 0u8..=7 {
            let ticks = if scale <= 6 {
                micros_full / 10u64.pow(u32::from(6 - scale))
            } else {
                micros_full * 10
            };
            let time_len = time_bytes_for_scale(scale);
            let mut raw = vec![(time_len + 3) as u8];
            raw.extend_from_slice(&ticks.to_le_bytes()[..time_len]);
            raw.extend_from_slice(&737518u32.to_le_bytes()[..3]);
            let mut src: &[u8] = &raw;
            let v = decode_value(&mut src, &dt2(scale)).unwrap();
            let SqlValue::DateTime(dt) = v else {
                panic!("expected datetime at scale {scale}");
            };
            let truncated = if scale == 0 {
                micros_full / 1_000_000 * 1_000_000
            } else {
                let step = 10u64.pow(u32::from(6 - scale.min(6)));
                micros_full / step * step
            };
            let got = dt.time().signed_duration_since(NaiveTime::MIN);
            assert_eq!(
                got.num_microseconds().unwrap() as u64,
                truncated,
                "scale {scale}"
            );
        }
    }

    #[test]
    fn datetimeoffset_applies_offset() {
        // 10:00:00 UTC at +02:00, scale 0, date 2020-01-01 (days 737424).
        let ticks: u64 = 10 * 3600;
        let days = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .signed_duration_since(NaiveDate::from_ymd_opt(1, 1, 1).unwrap())
            .num_days() as u32;
        let mut raw = vec![8u8];
        raw.extend_from_slice(&ticks.to_le_bytes()[..3]);
        raw.extend_from_slice(&days.to_le_bytes()[..3]);
        raw.extend_from_slice(&120i16.to_le_bytes());
        let mut src: &[u8] = &raw;
        let v = decode_value(&mut src, &ColumnType::temporal(TypeId::DateTimeOffset, 0)).unwrap();
        let SqlValue::DateTimeOffset(dto) = v else {
            panic!("expected datetimeoffset");
        };
        assert_eq!(dto.offset().local_minus_utc(), 7200);
        assert_eq!(dto.naive_utc().time(), NaiveTime::from_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn decimal_sign_and_scale() {
        // -123.45 as DECIMAL(10,2): sign 0, magnitude 12345.
        let mut raw = vec![5u8, 0u8];
        raw.extend_from_slice(&12345u32.to_le_bytes());
        let mut src: &[u8] = &raw;
        let v = decode_value(&mut src, &ColumnType::decimal(10, 2)).unwrap();
        assert_eq!(v, SqlValue::Decimal(Decimal::new(-12345, 2)));
    }

    #[test]
    fn money_is_scaled_by_ten_thousand() {
        // 1.50 => raw 15000, high word first.
        let raw_value: i64 = 15000;
        let mut raw = Vec::new();
        raw.extend_from_slice(&((raw_value >> 32) as i32).to_le_bytes());
        raw.extend_from_slice(&((raw_value & 0xFFFF_FFFF) as u32).to_le_bytes());
        let mut src: &[u8] = &raw;
        let v = decode_value(&mut src, &ColumnType::plain(TypeId::Money)).unwrap();
        assert_eq!(v, SqlValue::Decimal(Decimal::new(15000, 4)));
    }

    #[test]
    fn guid_reorders_mixed_endian() {
        let wire: [u8; 17] = [
            16, 0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xAA, 0xBB, 0xCC,
            0xDD, 0xEE, 0xFF,
        ];
        let mut src: &[u8] = &wire;
        let v = decode_value(&mut src, &ColumnType::plain(TypeId::Guid)).unwrap();
        assert_eq!(
            v,
            SqlValue::Uuid("00112233-4455-6677-8899-aabbccddeeff".parse().unwrap())
        );
    }

    #[test]
    fn plp_chunks_reassemble() {
        // NVARCHAR(MAX) "AB" split across two PLP chunks.
        let mut raw = Vec::new();
        raw.extend_from_slice(&4u64.to_le_bytes());
        raw.extend_from_slice(&2u32.to_le_bytes());
        raw.extend_from_slice(&[0x41, 0x00]);
        raw.extend_from_slice(&2u32.to_le_bytes());
        raw.extend_from_slice(&[0x42, 0x00]);
        raw.extend_from_slice(&0u32.to_le_bytes());
        let ty = ColumnType::sized(TypeId::NVarChar, MAX_SENTINEL);
        let mut src: &[u8] = &raw;
        assert_eq!(
            decode_value(&mut src, &ty).unwrap(),
            SqlValue::String("AB".into())
        );
        assert!(src.is_empty());

        // PLP NULL sentinel.
        let mut src: &[u8] = &PLP_NULL.to_le_bytes();
        assert_eq!(decode_value(&mut src, &ty).unwrap(), SqlValue::Null);
    }

    #[test]
    fn plp_incomplete_leaves_cursor() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&4u64.to_le_bytes());
        raw.extend_from_slice(&4u32.to_le_bytes());
        raw.extend_from_slice(&[0x41, 0x00]); // chunk cut short
        let ty = ColumnType::sized(TypeId::NVarChar, MAX_SENTINEL);
        let full = raw.clone();
        let mut src: &[u8] = &raw;
        let err = decode_value(&mut src, &ty).unwrap_err();
        assert!(err.is_incomplete());
        assert_eq!(src.len(), full.len(), "cursor must not consume on incomplete");
    }

    #[test]
    fn legacy_datetime_third_second_ticks() {
        // 1900-01-02 00:00:01 => days=1, ticks=300.
        let mut raw = Vec::new();
        raw.extend_from_slice(&1i32.to_le_bytes());
        raw.extend_from_slice(&300u32.to_le_bytes());
        let mut src: &[u8] = &raw;
        let v = decode_value(&mut src, &ColumnType::plain(TypeId::DateTime)).unwrap();
        assert_eq!(
            v,
            SqlValue::DateTime(
                NaiveDate::from_ymd_opt(1900, 1, 2)
                    .unwrap()
                    .and_hms_opt(0, 0, 1)
                    .unwrap()
            )
        );
    }

    #[test]
    fn varchar_uses_collation_code_page() {
        // 0xE9 is 'é' in Windows-1252.
        let mut src: &[u8] = &[1, 0, 0xE9];
        let mut ty = ColumnType::sized(TypeId::BigVarChar, 100);
        ty.collation = Some(Collation {
            lcid: 0x0409,
            sort_id: 52,
        });
        assert_eq!(
            decode_value(&mut src, &ty).unwrap(),
            SqlValue::String("é".into())
        );
    }
}
