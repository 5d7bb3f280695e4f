//! # mssql-session
//!
//! A SQL Server session over native TDS 7.4.
//!
//! [`Session`] owns one socket and walks the connection lifecycle
//! (`Disconnected → Authenticating → Idle → Executing → Cancelling`),
//! negotiating encryption during PRELOGIN, authenticating with LOGIN7 or
//! the FEDAUTH feature extension, and tracking session environment
//! (database, packet size, transaction descriptors).
//!
//! [`QueryStream`] is the streaming result pipeline: it reads one packet
//! at a time, feeds the resumable token parser, and fills fixed-size
//! [`RowChunk`]s, so memory stays bounded regardless of result-set size.
//! Cancellation sends ATTENTION out-of-band and drains to the
//! acknowledging DONE under a deadline.
//!
//! [`BulkWriter`] assembles `INSERT BULK` payloads (COLMETADATA + ROW
//! tokens + DONE) for high-throughput loads.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bulk;
pub mod chunk;
pub mod config;
pub mod error;
pub mod session;
pub mod stream;

pub use bulk::{BulkColumn, BulkWriter};
pub use mssql_auth::{AccessToken, Credentials, TokenSource};
pub use chunk::RowChunk;
pub use config::{EncryptMode, SessionConfig};
pub use error::SessionError;
pub use session::{CancelHandle, Session, SessionState};
pub use stream::{CancelToken, QueryStream, StreamState};
