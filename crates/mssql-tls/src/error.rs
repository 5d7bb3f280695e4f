//! TLS errors.

use thiserror::Error;

/// Errors raised during TLS negotiation.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Invalid connector configuration.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// The hostname is not a valid DNS name for SNI.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// The handshake failed.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),
}
