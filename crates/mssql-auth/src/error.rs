//! Authentication errors.

use thiserror::Error;

/// Errors raised while preparing or refreshing credentials.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The server rejected the login.
    #[error("login rejected: {0}")]
    LoginRejected(String),

    /// The Azure AD access token has expired.
    #[error("access token expired")]
    TokenExpired,

    /// Acquiring a replacement token failed.
    #[error("token acquisition failed: {0}")]
    TokenAcquisition(String),
}

/// SQL Server error numbers that indicate an expired or invalid Azure AD
/// token; the pool re-acquires credentials before the next attempt.
pub const TOKEN_EXPIRED_ERRORS: &[i32] = &[18456, 33205, 40615];

/// Whether a server error number signals token expiry.
#[must_use]
pub fn is_token_expiry_error(number: i32) -> bool {
    TOKEN_EXPIRED_ERRORS.contains(&number)
}
