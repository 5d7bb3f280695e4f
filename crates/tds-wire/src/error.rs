//! Wire protocol errors.

use tds_types::TypeError;
use thiserror::Error;

/// Errors raised while encoding or decoding TDS protocol structures.
#[derive(Debug, Clone, Error)]
pub enum WireError {
    /// Not enough bytes to decode the structure; retry with more input.
    #[error("need {needed} bytes, {available} available")]
    Incomplete {
        /// Bytes required to make progress.
        needed: usize,
        /// Bytes currently available.
        available: usize,
    },

    /// Unknown packet type byte.
    #[error("invalid packet type 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Packet status byte carries undefined bits.
    #[error("invalid packet status 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Packet header declares a length below the header size or above the
    /// negotiated maximum.
    #[error("invalid packet length {0}")]
    InvalidPacketLength(u16),

    /// Unknown or out-of-place token byte in the response stream.
    #[error("unexpected token 0x{0:02X}")]
    UnexpectedToken(u8),

    /// A row token arrived before any column metadata.
    #[error("row data before column metadata")]
    RowBeforeMetadata,

    /// Malformed PRELOGIN response.
    #[error("malformed PRELOGIN response: {0}")]
    MalformedPrelogin(&'static str),

    /// A length-framed token's content did not fill its declared length.
    #[error("malformed {0} token")]
    MalformedToken(&'static str),

    /// String field contained invalid UTF-16.
    #[error("invalid UTF-16 in {0}")]
    StringEncoding(&'static str),

    /// A column value failed to decode.
    #[error(transparent)]
    Type(TypeError),
}

impl WireError {
    /// Construct an [`WireError::Incomplete`].
    #[must_use]
    pub fn incomplete(needed: usize, available: usize) -> Self {
        Self::Incomplete { needed, available }
    }

    /// Whether this error means "retry with more input".
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }
}

impl From<TypeError> for WireError {
    fn from(e: TypeError) -> Self {
        match e {
            TypeError::Incomplete { needed, available } => Self::Incomplete { needed, available },
            other => Self::Type(other),
        }
    }
}
