//! # tds-wire
//!
//! Pure implementation of the MS-TDS (Tabular Data Stream) wire protocol as
//! spoken by Microsoft SQL Server, protocol version 7.4.
//!
//! This crate is intentionally IO-agnostic: it builds outbound handshake and
//! request payloads and parses inbound token streams from byte buffers, with
//! no networking logic and no async runtime assumptions. The transport and
//! session crates layer I/O on top.
//!
//! The centerpiece is [`TokenStreamParser`], an incremental state machine
//! that decodes COLMETADATA / ROW / NBCROW / DONE / ERROR / ENVCHANGE tokens
//! and tolerates token splits at arbitrary packet boundaries.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod sql_batch;
pub mod token;

pub use error::WireError;
pub use login7::{FedAuthExtension, Login7, TDS_VERSION_74};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus,
    PacketType,
};
pub use prelogin::{EncryptionLevel, PreLogin};
pub use sql_batch::encode_sql_batch;
pub use token::{
    ColumnMeta, Done, DoneStatus, EnvChange, FedAuthInfo, LoginAck, ServerMessage, Token,
    TokenStreamParser, TokenType,
};
