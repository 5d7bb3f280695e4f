//! Credential types.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::AuthError;

/// An Azure AD access token with an optional expiry.
#[derive(Clone)]
pub struct AccessToken {
    /// The bearer token.
    pub token: Cow<'static, str>,
    /// When the token expires, if known.
    pub expires_at: Option<Instant>,
}

impl AccessToken {
    /// Token without expiry tracking.
    pub fn new(token: impl Into<Cow<'static, str>>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// Token expiring after `expires_in`.
    pub fn expiring(token: impl Into<Cow<'static, str>>, expires_in: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: Some(Instant::now() + expires_in),
        }
    }

    /// Whether the token is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Callback that acquires a fresh Azure AD token.
///
/// Invoked by the pool factory when the cached token has expired. The
/// OAuth2 exchange itself lives with the caller (host engine secret
/// integration); this crate only consumes the result.
pub type TokenSource = Arc<dyn Fn() -> Result<AccessToken, AuthError> + Send + Sync>;

/// Authentication method for a catalog's connections.
#[derive(Clone)]
pub enum Credentials {
    /// SQL Server authentication.
    SqlServer {
        /// Login name.
        username: Cow<'static, str>,
        /// Password.
        password: Cow<'static, str>,
    },
    /// Azure AD federated authentication with a pre-acquired token.
    AzureAd {
        /// The current token.
        token: AccessToken,
        /// Source for replacement tokens on expiry.
        source: Option<TokenSource>,
    },
}

impl Credentials {
    /// SQL Server authentication.
    pub fn sql_server(
        username: impl Into<Cow<'static, str>>,
        password: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::SqlServer {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Azure AD authentication with a static token.
    #[must_use]
    pub fn azure_ad(token: AccessToken) -> Self {
        Self::AzureAd {
            token,
            source: None,
        }
    }

    /// Azure AD authentication with a refresh callback.
    #[must_use]
    pub fn azure_ad_with_source(token: AccessToken, source: TokenSource) -> Self {
        Self::AzureAd {
            token,
            source: Some(source),
        }
    }

    /// Whether these credentials use federated authentication.
    #[must_use]
    pub fn is_azure_ad(&self) -> bool {
        matches!(self, Self::AzureAd { .. })
    }

    /// A usable token, refreshing through the source when expired.
    ///
    /// For SQL authentication this returns `None`.
    pub fn current_token(&mut self) -> Result<Option<&AccessToken>, AuthError> {
        match self {
            Self::SqlServer { .. } => Ok(None),
            Self::AzureAd { token, source } => {
                if token.is_expired() {
                    let Some(source) = source else {
                        return Err(AuthError::TokenExpired);
                    };
                    tracing::debug!("access token expired, re-acquiring");
                    *token = source()?;
                }
                Ok(Some(token))
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlServer { username, .. } => f
                .debug_struct("SqlServer")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::AzureAd { token, source } => f
                .debug_struct("AzureAd")
                .field("token", token)
                .field("has_source", &source.is_some())
                .finish(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sql_credentials_have_no_token() {
        let mut creds = Credentials::sql_server("sa", "pw");
        assert!(creds.current_token().unwrap().is_none());
        assert!(!creds.is_azure_ad());
    }

    #[test]
    fn expired_token_without_source_fails() {
        let mut creds =
            Credentials::azure_ad(AccessToken::expiring("tok", Duration::from_secs(0)));
        assert!(matches!(
            creds.current_token(),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn expired_token_is_refreshed_through_source() {
        let source: TokenSource = Arc::new(|| Ok(AccessToken::new("fresh")));
        let mut creds = Credentials::azure_ad_with_source(
            AccessToken::expiring("stale", Duration::from_secs(0)),
            source,
        );
        let token = creds.current_token().unwrap().unwrap();
        assert_eq!(token.token, "fresh");
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials::sql_server("sa", "hunter2");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
