//! SQL_BATCH request encoding.
//!
//! A batch payload is the 22-byte ALL_HEADERS block (total length,
//! transaction-descriptor subheader, outstanding request count) followed by
//! the query text as UTF-16LE. Requests inside an explicit transaction must
//! carry the descriptor received in the BeginTransaction ENVCHANGE.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16;

/// Size of the ALL_HEADERS block with the single transaction header.
const ALL_HEADERS_SIZE: u32 = 22;

/// Encode a SQL batch payload.
///
/// `transaction_descriptor` is 0 in auto-commit mode.
#[must_use]
pub fn encode_sql_batch(sql: &str, transaction_descriptor: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_SIZE as usize + sql.len() * 2);

    buf.put_u32_le(ALL_HEADERS_SIZE);
    buf.put_u32_le(18); // header length
    buf.put_u16_le(0x0002); // transaction descriptor header
    buf.put_u64_le(transaction_descriptor);
    buf.put_u32_le(1); // outstanding request count

    write_utf16(&mut buf, sql);
    buf.freeze()
}
