//! Session errors.

use std::sync::Arc;

use tds_wire::ServerMessage;
use thiserror::Error;

/// Errors raised by session operations.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Socket-level failure. Fatal to the connection.
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// TLS negotiation failure. Fatal to the connection.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Packet framing or reassembly failure. Fatal to the connection.
    #[error(transparent)]
    Transport(#[from] mssql_transport::TransportError),

    /// Token stream violation. Fatal to the connection.
    #[error(transparent)]
    Wire(#[from] tds_wire::WireError),

    /// Credential failure (login rejected, token expired).
    #[error(transparent)]
    Auth(#[from] mssql_auth::AuthError),

    /// Unexpected protocol state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error reported by the server in an ERROR token.
    #[error("server error {number} (severity {class}): {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Severity class.
        class: u8,
        /// Error state.
        state: u8,
        /// Message text.
        message: String,
        /// Line number in the batch.
        line: i32,
    },

    /// TCP/TLS connect did not finish before the deadline.
    #[error("connection timed out")]
    ConnectTimeout,

    /// The cancellation acknowledgment did not arrive in time; the
    /// connection was destroyed.
    #[error("cancellation timed out")]
    CancelTimeout,

    /// Azure SQL redirected the connection.
    #[error("routing redirect to {host}:{port}")]
    Routing {
        /// Redirect target host.
        host: String,
        /// Redirect target port.
        port: u16,
    },

    /// Invalid configuration or connection string.
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation was attempted in the wrong lifecycle state.
    #[error("invalid session state: expected {expected}, found {actual}")]
    InvalidState {
        /// Required state.
        expected: &'static str,
        /// Observed state.
        actual: &'static str,
    },
}

impl SessionError {
    /// Build a server error from an ERROR token.
    #[must_use]
    pub fn from_server(message: &ServerMessage) -> Self {
        Self::Server {
            number: message.number,
            class: message.class,
            state: message.state,
            message: message.message.clone(),
            line: message.line,
        }
    }

    /// Whether this error destroys the connection (not recyclable).
    #[must_use]
    pub fn is_fatal_to_connection(&self) -> bool {
        match self {
            Self::Io(_)
            | Self::Tls(_)
            | Self::Transport(_)
            | Self::Wire(_)
            | Self::Auth(_)
            | Self::Protocol(_)
            | Self::ConnectTimeout
            | Self::CancelTimeout
            | Self::Routing { .. } => true,
            Self::Server { class, .. } => *class >= 20,
            Self::Config(_) | Self::InvalidState { .. } => false,
        }
    }

    /// Whether this error signals an expired federated-auth token, which
    /// makes the pool factory re-acquire credentials.
    #[must_use]
    pub fn is_token_expiry(&self) -> bool {
        match self {
            Self::Auth(mssql_auth::AuthError::TokenExpired) => true,
            Self::Server { number, .. } => mssql_auth::error::is_token_expiry_error(*number),
            _ => false,
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<mssql_tls::TlsError> for SessionError {
    fn from(e: mssql_tls::TlsError) -> Self {
        Self::Tls(e.to_string())
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(SessionError::ConnectTimeout.is_fatal_to_connection());
        assert!(SessionError::CancelTimeout.is_fatal_to_connection());
        assert!(!SessionError::Config("x".into()).is_fatal_to_connection());

        let user_error = SessionError::Server {
            number: 208,
            class: 16,
            state: 1,
            message: "Invalid object".into(),
            line: 1,
        };
        assert!(!user_error.is_fatal_to_connection());

        let fatal = SessionError::Server {
            number: 9002,
            class: 21,
            state: 1,
            message: "log full".into(),
            line: 0,
        };
        assert!(fatal.is_fatal_to_connection());
    }

    #[test]
    fn token_expiry_detection() {
        let expired = SessionError::Server {
            number: 18456,
            class: 14,
            state: 1,
            message: "Login failed".into(),
            line: 1,
        };
        assert!(expired.is_token_expiry());
        assert!(!SessionError::ConnectTimeout.is_token_expiry());
    }
}
