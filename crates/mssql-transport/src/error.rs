//! Transport-level errors.

use std::sync::Arc;

use thiserror::Error;

/// Errors raised by packet framing and the transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Underlying socket error.
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// Malformed packet header or token data.
    #[error(transparent)]
    Wire(#[from] tds_wire::WireError),

    /// A packet exceeded the negotiated maximum size.
    #[error("packet of {size} bytes exceeds maximum {max}")]
    PacketTooLarge {
        /// Declared packet size.
        size: usize,
        /// Negotiated maximum.
        max: usize,
    },

    /// The socket closed in the middle of a message.
    #[error("connection closed mid-message")]
    ConnectionClosed,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}
