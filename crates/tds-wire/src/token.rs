//! TDS token stream definitions and the incremental parser.
//!
//! A tabular response is a stream of tokens. The parser here is resumable:
//! it accumulates bytes fed from the transport and yields complete tokens,
//! returning `Ok(None)` (need more data) without consuming anything when a
//! token straddles the end of the buffer. This makes packet boundaries
//! invisible to consumers.
//!
//! ROW and NBCROW tokens are decoded eagerly against the current
//! COLMETADATA, so scale-dependent types (TIME, DATETIME2, DATETIMEOFFSET)
//! use the column's declared scale on both row paths.

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tds_types::{Collation, ColumnType, SqlValue, TypeId, decode_value};

use crate::codec::{read_b_varchar, read_us_varchar};
use crate::error::WireError;

/// Token type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Result-set column metadata.
    ColMetaData = 0x81,
    /// Row with per-value NULL indicators.
    Row = 0xD1,
    /// Row with a leading null bitmap.
    NbcRow = 0xD2,
    /// Statement completion.
    Done = 0xFD,
    /// Stored procedure completion.
    DoneProc = 0xFE,
    /// Completion of a statement inside a procedure.
    DoneInProc = 0xFF,
    /// Server error message.
    Error = 0xAA,
    /// Server informational message.
    Info = 0xAB,
    /// Environment change notification.
    EnvChange = 0xE3,
    /// Login acknowledgment.
    LoginAck = 0xAD,
    /// Federated authentication info (advisory).
    FedAuthInfo = 0xEE,
    /// Feature extension acknowledgment.
    FeatureExtAck = 0xAE,
    /// Stored procedure return status.
    ReturnStatus = 0x79,
    /// Stored procedure return value.
    ReturnValue = 0xAC,
    /// Column ordering information.
    Order = 0xA9,
    /// Extended column info.
    ColInfo = 0xA5,
    /// Table name for browse mode.
    TabName = 0xA4,
    /// Session state (session recovery).
    SessionState = 0xE4,
}

impl TokenType {
    /// Map a raw byte to a token type.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x81 => Some(Self::ColMetaData),
            0xD1 => Some(Self::Row),
            0xD2 => Some(Self::NbcRow),
            0xFD => Some(Self::Done),
            0xFE => Some(Self::DoneProc),
            0xFF => Some(Self::DoneInProc),
            0xAA => Some(Self::Error),
            0xAB => Some(Self::Info),
            0xE3 => Some(Self::EnvChange),
            0xAD => Some(Self::LoginAck),
            0xEE => Some(Self::FedAuthInfo),
            0xAE => Some(Self::FeatureExtAck),
            0x79 => Some(Self::ReturnStatus),
            0xAC => Some(Self::ReturnValue),
            0xA9 => Some(Self::Order),
            0xA5 => Some(Self::ColInfo),
            0xA4 => Some(Self::TabName),
            0xE4 => Some(Self::SessionState),
            _ => None,
        }
    }
}

/// A parsed token.
#[derive(Debug, Clone)]
pub enum Token {
    /// Result-set structure; rows that follow conform to it.
    ColMetaData(Arc<[ColumnMeta]>),
    /// A decoded row (from either ROW or NBCROW). The value count always
    /// equals the current metadata's column count.
    Row(Vec<SqlValue>),
    /// Statement completion.
    Done(Done),
    /// Procedure completion.
    DoneProc(Done),
    /// In-procedure completion.
    DoneInProc(Done),
    /// Server error.
    Error(ServerMessage),
    /// Server warning/informational message.
    Info(ServerMessage),
    /// Session environment change.
    EnvChange(EnvChange),
    /// Login acknowledgment.
    LoginAck(LoginAck),
    /// Federated authentication advisory.
    FedAuthInfo(FedAuthInfo),
    /// Feature extension acknowledgment (contents ignored).
    FeatureExtAck,
    /// Procedure return status.
    ReturnStatus(i32),
    /// A token the integration skips structurally.
    Skipped(TokenType),
}

/// Column metadata as decoded from COLMETADATA.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,
    /// Server user type.
    pub user_type: u32,
    /// Whether the column is nullable.
    pub nullable: bool,
    /// Whether the column is an identity column.
    pub identity: bool,
    /// Whether the column is computed.
    pub computed: bool,
    /// Wire type descriptor (carries length/precision/scale/collation).
    pub ty: ColumnType,
}

/// DONE/DONEPROC/DONEINPROC payload.
#[derive(Debug, Clone, Copy)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Current command token.
    pub cur_cmd: u16,
    /// Row count, valid when `status.count` is set.
    pub row_count: u64,
}

/// DONE status bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoneStatus {
    /// A further result set follows.
    pub more: bool,
    /// The statement errored.
    pub error: bool,
    /// A transaction is open.
    pub in_xact: bool,
    /// `row_count` is valid.
    pub count: bool,
    /// Attention (cancellation) acknowledgment.
    pub attn: bool,
    /// Server error terminated the statement.
    pub srverror: bool,
}

mod done_bits {
    pub const MORE: u16 = 0x0001;
    pub const ERROR: u16 = 0x0002;
    pub const INXACT: u16 = 0x0004;
    pub const COUNT: u16 = 0x0010;
    pub const ATTN: u16 = 0x0020;
    pub const SRVERROR: u16 = 0x0100;
}

impl DoneStatus {
    /// Parse from the wire bits.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        use done_bits::*;
        Self {
            more: bits & MORE != 0,
            error: bits & ERROR != 0,
            in_xact: bits & INXACT != 0,
            count: bits & COUNT != 0,
            attn: bits & ATTN != 0,
            srverror: bits & SRVERROR != 0,
        }
    }

    /// Serialize to wire bits.
    #[must_use]
    pub fn to_bits(self) -> u16 {
        use done_bits::*;
        let mut bits = 0;
        if self.more {
            bits |= MORE;
        }
        if self.error {
            bits |= ERROR;
        }
        if self.in_xact {
            bits |= INXACT;
        }
        if self.count {
            bits |= COUNT;
        }
        if self.attn {
            bits |= ATTN;
        }
        if self.srverror {
            bits |= SRVERROR;
        }
        bits
    }
}

impl Done {
    /// Fixed size of the token body.
    pub const SIZE: usize = 12;

    /// Command token for INSERT, used in bulk-load DONE.
    pub const CMD_INSERT: u16 = 0x00C3;

    fn decode(src: &mut &[u8]) -> Result<Self, WireError> {
        if src.len() < Self::SIZE {
            return Err(WireError::incomplete(Self::SIZE, src.len()));
        }
        Ok(Self {
            status: DoneStatus::from_bits(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Encode the token including its type byte (used by the bulk writer).
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::Done as u8);
        dst.put_u16_le(self.status.to_bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }
}

/// ERROR and INFO token payload (identical layouts).
#[derive(Debug, Clone)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Message state.
    pub state: u8,
    /// Severity class (0-25).
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Reporting server name.
    pub server: String,
    /// Procedure name, if any.
    pub procedure: String,
    /// Line number in the batch.
    pub line: i32,
}

impl ServerMessage {
    /// Severity at or above which the connection is no longer usable.
    pub const FATAL_CLASS: u8 = 20;

    /// Whether this error terminates the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.class >= Self::FATAL_CLASS
    }

    fn decode(src: &mut &[u8], what: &'static str) -> Result<Self, WireError> {
        if src.len() < 2 {
            return Err(WireError::incomplete(2, src.len()));
        }
        let length = u16::from_le_bytes([src[0], src[1]]) as usize;
        if src.len() < 2 + length {
            return Err(WireError::incomplete(2 + length, src.len()));
        }
        src.advance(2);
        let mut body = &src[..length];
        let parsed = Self::decode_body(&mut body)
            .map_err(|e| if e.is_incomplete() { WireError::MalformedToken(what) } else { e })?;
        src.advance(length);
        Ok(parsed)
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, WireError> {
        if src.len() < 6 {
            return Err(WireError::incomplete(6, src.len()));
        }
        let number = src.get_i32_le();
        let state = src.get_u8();
        let class = src.get_u8();
        let message = read_us_varchar(src)?;
        let server = read_b_varchar(src)?;
        let procedure = read_b_varchar(src)?;
        if src.len() < 4 {
            return Err(WireError::incomplete(4, src.len()));
        }
        let line = src.get_i32_le();
        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }
}

/// Session environment change.
#[derive(Debug, Clone)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database name.
        new: String,
        /// Previous database name.
        old: String,
    },
    /// Negotiated packet size changed.
    PacketSize {
        /// New size in bytes.
        new: usize,
    },
    /// Collation changed (values ignored).
    SqlCollation,
    /// A transaction began; the descriptor must accompany every request in it.
    BeginTransaction {
        /// Server transaction descriptor.
        descriptor: u64,
    },
    /// The transaction committed.
    CommitTransaction,
    /// The transaction rolled back.
    RollbackTransaction,
    /// Azure SQL routing redirect.
    Routing {
        /// Redirect target host.
        host: String,
        /// Redirect target port.
        port: u16,
    },
    /// Any other environment change, carried for tracing.
    Other {
        /// Raw environment change type.
        env_type: u8,
    },
}

impl EnvChange {
    fn decode(src: &mut &[u8]) -> Result<Self, WireError> {
        if src.len() < 2 {
            return Err(WireError::incomplete(2, src.len()));
        }
        let length = u16::from_le_bytes([src[0], src[1]]) as usize;
        if src.len() < 2 + length {
            return Err(WireError::incomplete(2 + length, src.len()));
        }
        src.advance(2);
        let mut body = &src[..length];
        let parsed = Self::decode_body(&mut body)
            .map_err(|e| if e.is_incomplete() { WireError::MalformedToken("ENVCHANGE") } else { e })?;
        src.advance(length);
        Ok(parsed)
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, WireError> {
        if src.is_empty() {
            return Err(WireError::incomplete(1, 0));
        }
        let env_type = src.get_u8();
        match env_type {
            1 => {
                let new = read_b_varchar(src)?;
                let old = read_b_varchar(src)?;
                Ok(Self::Database { new, old })
            }
            4 => {
                let new = read_b_varchar(src)?;
                let _old = read_b_varchar(src)?;
                let size = new
                    .parse::<usize>()
                    .map_err(|_| WireError::MalformedToken("ENVCHANGE packet size"))?;
                Ok(Self::PacketSize { new: size })
            }
            7 => Ok(Self::SqlCollation),
            8 => {
                // New value: byte-counted binary transaction descriptor.
                if src.is_empty() {
                    return Err(WireError::incomplete(1, 0));
                }
                let len = src.get_u8() as usize;
                if len != 8 || src.len() < 8 {
                    return Err(WireError::MalformedToken("ENVCHANGE begin transaction"));
                }
                let descriptor = src.get_u64_le();
                Ok(Self::BeginTransaction { descriptor })
            }
            9 => Ok(Self::CommitTransaction),
            10 => Ok(Self::RollbackTransaction),
            20 => {
                // Routing: u16 value length, protocol byte, port, US_VARCHAR host.
                if src.len() < 5 {
                    return Err(WireError::incomplete(5, src.len()));
                }
                let _value_len = src.get_u16_le();
                let _protocol = src.get_u8();
                let port = src.get_u16_le();
                let host = read_us_varchar(src)?;
                Ok(Self::Routing { host, port })
            }
            other => Ok(Self::Other { env_type: other }),
        }
    }
}

/// LOGINACK payload.
#[derive(Debug, Clone)]
pub struct LoginAck {
    /// SQL interface type.
    pub interface: u8,
    /// Negotiated TDS version (raw).
    pub tds_version: u32,
    /// Server program name.
    pub prog_name: String,
    /// Server program version.
    pub prog_version: u32,
}

impl LoginAck {
    fn decode(src: &mut &[u8]) -> Result<Self, WireError> {
        if src.len() < 2 {
            return Err(WireError::incomplete(2, src.len()));
        }
        let length = u16::from_le_bytes([src[0], src[1]]) as usize;
        if src.len() < 2 + length {
            return Err(WireError::incomplete(2 + length, src.len()));
        }
        src.advance(2);
        let mut body = &src[..length];
        let parsed = (|| {
            if body.len() < 5 {
                return Err(WireError::incomplete(5, body.len()));
            }
            let interface = body.get_u8();
            let tds_version = body.get_u32_le();
            let prog_name = read_b_varchar(&mut body)?;
            if body.len() < 4 {
                return Err(WireError::incomplete(4, body.len()));
            }
            let prog_version = body.get_u32_le();
            Ok(Self {
                interface,
                tds_version,
                prog_name,
                prog_version,
            })
        })()
        .map_err(|e: WireError| {
            if e.is_incomplete() {
                WireError::MalformedToken("LOGINACK")
            } else {
                e
            }
        })?;
        src.advance(length);
        Ok(parsed)
    }
}

/// FEDAUTHINFO payload: advisory STS URL and service principal name.
#[derive(Debug, Clone, Default)]
pub struct FedAuthInfo {
    /// Security token service URL.
    pub sts_url: String,
    /// Service principal name.
    pub spn: String,
}

impl FedAuthInfo {
    fn decode(src: &mut &[u8]) -> Result<Self, WireError> {
        if src.len() < 4 {
            return Err(WireError::incomplete(4, src.len()));
        }
        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if src.len() < 4 + length {
            return Err(WireError::incomplete(4 + length, src.len()));
        }
        src.advance(4);
        let body = &src[..length];
        let parsed = Self::decode_body(body).unwrap_or_default();
        src.advance(length);
        Ok(parsed)
    }

    /// Best-effort parse; the token is informational only.
    fn decode_body(body: &[u8]) -> Option<Self> {
        let mut cur = body;
        if cur.len() < 4 {
            return None;
        }
        let count = cur.get_u32_le() as usize;
        let mut info = Self::default();
        for _ in 0..count {
            if cur.len() < 9 {
                return None;
            }
            let id = cur.get_u8();
            let data_len = cur.get_u32_le() as usize;
            let offset = cur.get_u32_le() as usize;
            let data = body.get(offset..offset + data_len)?;
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let value = String::from_utf16(&units).ok()?;
            match id {
                0x01 => info.spn = value,
                0x02 => info.sts_url = value,
                _ => {}
            }
        }
        Some(info)
    }
}

// =============================================================================
// COLMETADATA and row decoding
// =============================================================================

/// COLMETADATA count meaning "no metadata follows".
const NO_METADATA: u16 = 0xFFFF;

fn decode_colmetadata(src: &mut &[u8]) -> Result<Arc<[ColumnMeta]>, WireError> {
    if src.len() < 2 {
        return Err(WireError::incomplete(2, src.len()));
    }
    let count = u16::from_le_bytes([src[0], src[1]]);
    src.advance(2);
    if count == NO_METADATA {
        return Ok(Vec::new().into());
    }

    let mut columns = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if src.len() < 6 {
            return Err(WireError::incomplete(6, src.len()));
        }
        let user_type = src.get_u32_le();
        let flags = src.get_u16_le();
        let ty = read_type_info(src)?;
        let name = read_b_varchar(src)?;
        columns.push(ColumnMeta {
            name,
            user_type,
            nullable: flags & 0x0001 != 0,
            identity: flags & 0x0010 != 0,
            computed: flags & 0x0020 != 0,
            ty,
        });
    }
    Ok(columns.into())
}

/// Read the TypeInfo block of a column or return value.
fn read_type_info(src: &mut &[u8]) -> Result<ColumnType, WireError> {
    if src.is_empty() {
        return Err(WireError::incomplete(1, 0));
    }
    let type_id = TypeId::from_u8(src[0])?;
    src.advance(1);

    let mut ty = ColumnType::plain(type_id);
    match type_id {
        // Fixed-width types carry no descriptor bytes.
        TypeId::Int1
        | TypeId::Bit
        | TypeId::Int2
        | TypeId::Int4
        | TypeId::Int8
        | TypeId::Float4
        | TypeId::Float8
        | TypeId::Money
        | TypeId::Money4
        | TypeId::DateTime
        | TypeId::DateTime4
        | TypeId::Date => {}

        // Nullable wrappers: 1-byte maximum length.
        TypeId::IntN | TypeId::BitN | TypeId::FloatN | TypeId::MoneyN | TypeId::DateTimeN
        | TypeId::Guid => {
            if src.is_empty() {
                return Err(WireError::incomplete(1, 0));
            }
            ty.max_length = Some(u32::from(src.get_u8()));
        }

        // Decimal: length, precision, scale.
        TypeId::DecimalN | TypeId::NumericN => {
            if src.len() < 3 {
                return Err(WireError::incomplete(3, src.len()));
            }
            ty.max_length = Some(u32::from(src.get_u8()));
            ty.precision = Some(src.get_u8());
            ty.scale = Some(src.get_u8());
        }

        // Scaled temporal types: 1-byte scale.
        TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
            if src.is_empty() {
                return Err(WireError::incomplete(1, 0));
            }
            ty.scale = Some(src.get_u8());
        }

        // Character types: 2-byte max length plus 5-byte collation.
        TypeId::NVarChar | TypeId::NChar | TypeId::BigVarChar | TypeId::BigChar => {
            if src.len() < 7 {
                return Err(WireError::incomplete(7, src.len()));
            }
            ty.max_length = Some(u32::from(src.get_u16_le()));
            ty.collation = Some(Collation {
                lcid: src.get_u32_le(),
                sort_id: src.get_u8(),
            });
        }

        // Binary types: 2-byte max length.
        TypeId::BigVarBinary | TypeId::BigBinary => {
            if src.len() < 2 {
                return Err(WireError::incomplete(2, src.len()));
            }
            ty.max_length = Some(u32::from(src.get_u16_le()));
        }
    }
    Ok(ty)
}

fn decode_row(src: &mut &[u8], columns: &[ColumnMeta]) -> Result<Vec<SqlValue>, WireError> {
    let mut values = Vec::with_capacity(columns.len());
    for col in columns {
        values.push(decode_value(src, &col.ty)?);
    }
    Ok(values)
}

/// NBCROW: ceil(n/8) null-bitmap bytes, then values only for columns whose
/// bit is clear. Bit `k & 7` of byte `k >> 3` set means column `k` is NULL.
fn decode_nbc_row(src: &mut &[u8], columns: &[ColumnMeta]) -> Result<Vec<SqlValue>, WireError> {
    let bitmap_len = columns.len().div_ceil(8);
    if src.len() < bitmap_len {
        return Err(WireError::incomplete(bitmap_len, src.len()));
    }
    let bitmap = src[..bitmap_len].to_vec();
    src.advance(bitmap_len);

    let mut values = Vec::with_capacity(columns.len());
    for (k, col) in columns.iter().enumerate() {
        if bitmap[k >> 3] & (1 << (k & 7)) != 0 {
            values.push(SqlValue::Null);
        } else {
            // Same type descriptor as the ROW path, scale included.
            values.push(decode_value(src, &col.ty)?);
        }
    }
    Ok(values)
}

// =============================================================================
// Incremental parser
// =============================================================================

/// Resumable TDS token stream parser.
///
/// Feed raw payload bytes (packet headers already stripped) with
/// [`TokenStreamParser::feed`] and drain tokens with
/// [`TokenStreamParser::next_token`]. The parser is single-threaded and is
/// owned by whichever iterator currently drives the connection.
#[derive(Debug, Default)]
pub struct TokenStreamParser {
    buf: BytesMut,
    columns: Option<Arc<[ColumnMeta]>>,
}

impl TokenStreamParser {
    /// Create an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append message payload bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// The current result set's column metadata, if seen.
    #[must_use]
    pub fn columns(&self) -> Option<&Arc<[ColumnMeta]>> {
        self.columns.as_ref()
    }

    /// Drop all buffered state, preparing the parser for a new response.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.columns = None;
    }

    /// Parse the next complete token.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete token; the
    /// partial bytes stay buffered and parsing resumes after the next
    /// [`TokenStreamParser::feed`].
    pub fn next_token(&mut self) -> Result<Option<Token>, WireError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut cur: &[u8] = &self.buf;
        let result = decode_one(&mut cur, self.columns.as_deref());
        match result {
            Ok(token) => {
                let consumed = self.buf.len() - cur.len();
                self.buf.advance(consumed);
                if let Token::ColMetaData(columns) = &token {
                    self.columns = Some(Arc::clone(columns));
                }
                Ok(Some(token))
            }
            Err(e) if e.is_incomplete() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn decode_one(src: &mut &[u8], columns: Option<&[ColumnMeta]>) -> Result<Token, WireError> {
    let token_byte = src[0];
    let kind = TokenType::from_u8(token_byte).ok_or(WireError::UnexpectedToken(token_byte))?;
    src.advance(1);

    match kind {
        TokenType::ColMetaData => decode_colmetadata(src).map(Token::ColMetaData),
        TokenType::Row => {
            let columns = columns.ok_or(WireError::RowBeforeMetadata)?;
            decode_row(src, columns).map(Token::Row)
        }
        TokenType::NbcRow => {
            let columns = columns.ok_or(WireError::RowBeforeMetadata)?;
            decode_nbc_row(src, columns).map(Token::Row)
        }
        TokenType::Done => Done::decode(src).map(Token::Done),
        TokenType::DoneProc => Done::decode(src).map(Token::DoneProc),
        TokenType::DoneInProc => Done::decode(src).map(Token::DoneInProc),
        TokenType::Error => ServerMessage::decode(src, "ERROR").map(Token::Error),
        TokenType::Info => ServerMessage::decode(src, "INFO").map(Token::Info),
        TokenType::EnvChange => EnvChange::decode(src).map(Token::EnvChange),
        TokenType::LoginAck => LoginAck::decode(src).map(Token::LoginAck),
        TokenType::FedAuthInfo => FedAuthInfo::decode(src).map(Token::FedAuthInfo),
        TokenType::FeatureExtAck => {
            skip_feature_ext_ack(src)?;
            Ok(Token::FeatureExtAck)
        }
        TokenType::ReturnStatus => {
            if src.len() < 4 {
                return Err(WireError::incomplete(4, src.len()));
            }
            Ok(Token::ReturnStatus(src.get_i32_le()))
        }
        TokenType::Order | TokenType::ColInfo | TokenType::TabName => {
            skip_short_framed(src)?;
            Ok(Token::Skipped(kind))
        }
        TokenType::SessionState => {
            skip_long_framed(src)?;
            Ok(Token::Skipped(kind))
        }
        TokenType::ReturnValue => {
            skip_return_value(src)?;
            Ok(Token::Skipped(kind))
        }
    }
}

/// Skip a token framed by a 2-byte length prefix.
fn skip_short_framed(src: &mut &[u8]) -> Result<(), WireError> {
    if src.len() < 2 {
        return Err(WireError::incomplete(2, src.len()));
    }
    let length = u16::from_le_bytes([src[0], src[1]]) as usize;
    if src.len() < 2 + length {
        return Err(WireError::incomplete(2 + length, src.len()));
    }
    src.advance(2 + length);
    Ok(())
}

/// Skip a token framed by a 4-byte length prefix.
fn skip_long_framed(src: &mut &[u8]) -> Result<(), WireError> {
    if src.len() < 4 {
        return Err(WireError::incomplete(4, src.len()));
    }
    let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if src.len() < 4 + length {
        return Err(WireError::incomplete(4 + length, src.len()));
    }
    src.advance(4 + length);
    Ok(())
}

/// Skip the feature acknowledgment list, terminated by 0xFF.
fn skip_feature_ext_ack(src: &mut &[u8]) -> Result<(), WireError> {
    loop {
        if src.is_empty() {
            return Err(WireError::incomplete(1, 0));
        }
        let feature_id = src.get_u8();
        if feature_id == 0xFF {
            return Ok(());
        }
        if src.len() < 4 {
            return Err(WireError::incomplete(4, src.len()));
        }
        let data_len = src.get_u32_le() as usize;
        if src.len() < data_len {
            return Err(WireError::incomplete(data_len, src.len()));
        }
        src.advance(data_len);
    }
}

/// Skip a RETURNVALUE token by decoding and discarding its typed value.
fn skip_return_value(src: &mut &[u8]) -> Result<(), WireError> {
    if src.len() < 2 {
        return Err(WireError::incomplete(2, src.len()));
    }
    let _ordinal = src.get_u16_le();
    let _name = read_b_varchar(src)?;
    if src.len() < 7 {
        return Err(WireError::incomplete(7, src.len()));
    }
    let _status = src.get_u8();
    let _user_type = src.get_u32_le();
    let _flags = src.get_u16_le();
    let ty = read_type_info(src)?;
    decode_value(src, &ty)?;
    Ok(())
}
