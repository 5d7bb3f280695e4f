//! # mssql-transport
//!
//! Async TDS packet framing over a byte stream.
//!
//! Provides the tokio-util codec for 8-byte-header packet frames, the
//! multi-packet message assembler, and [`Transport`], a split-I/O wrapper
//! that can emit an ATTENTION packet from the write half while the read
//! half is blocked on a streaming result.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod frame;
pub mod message;
pub mod transport;

pub use error::TransportError;
pub use frame::{Packet, TdsFrameCodec};
pub use message::{Message, MessageAssembler};
pub use transport::{AttentionHandle, Transport};
