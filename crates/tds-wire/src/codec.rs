//! Shared string and length-prefix codecs.

use bytes::{Buf, BufMut};

use crate::error::WireError;

/// Read a B_VARCHAR: 1-byte character count followed by UTF-16LE data.
pub fn read_b_varchar(src: &mut &[u8]) -> Result<String, WireError> {
    if src.is_empty() {
        return Err(WireError::incomplete(1, 0));
    }
    let chars = src[0] as usize;
    read_prefixed_utf16(src, 1, chars)
}

/// Read a US_VARCHAR: 2-byte character count followed by UTF-16LE data.
pub fn read_us_varchar(src: &mut &[u8]) -> Result<String, WireError> {
    if src.len() < 2 {
        return Err(WireError::incomplete(2, src.len()));
    }
    let chars = u16::from_le_bytes([src[0], src[1]]) as usize;
    read_prefixed_utf16(src, 2, chars)
}

fn read_prefixed_utf16(
    src: &mut &[u8],
    prefix: usize,
    chars: usize,
) -> Result<String, WireError> {
    let total = prefix + chars * 2;
    if src.len() < total {
        return Err(WireError::incomplete(total, src.len()));
    }
    src.advance(prefix);
    let units: Vec<u16> = src[..chars * 2]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    src.advance(chars * 2);
    String::from_utf16(&units).map_err(|_| WireError::StringEncoding("varchar field"))
}

/// Write a B_VARCHAR (1-byte character count, UTF-16LE data).
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = units.len().min(255);
    dst.put_u8(len as u8);
    for unit in &units[..len] {
        dst.put_u16_le(*unit);
    }
}

/// Write a bare UTF-16LE string without a length prefix.
pub fn write_utf16(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// UTF-16 code-unit count of a string.
#[must_use]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}
