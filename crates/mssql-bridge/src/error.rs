//! Integration-boundary errors.

use thiserror::Error;

/// Errors surfaced to the host engine.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Session-layer failure (transport, protocol, server error).
    #[error(transparent)]
    Session(#[from] mssql_session::SessionError),

    /// Pool failure (acquire timeout, closed).
    #[error(transparent)]
    Pool(#[from] mssql_pool::PoolError),

    /// Catalog lookup failure.
    #[error(transparent)]
    Catalog(#[from] mssql_catalog::CatalogError),

    /// A bind-time problem: unknown column, unmappable type.
    #[error("binding error: {0}")]
    Binding(String),

    /// Conflicting or invalid options from the host engine.
    #[error("invalid usage: {0}")]
    Usage(String),

    /// Invalid global or attach-time setting.
    #[error("invalid setting {name}: {detail}")]
    Setting {
        /// Option name.
        name: &'static str,
        /// What was wrong.
        detail: String,
    },
}

/// Result alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
