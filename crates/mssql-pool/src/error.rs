//! Pool errors.

use thiserror::Error;

/// Errors raised by pool operations.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// No connection became available before the acquire deadline.
    #[error("timed out acquiring a connection after {0:?}")]
    AcquireTimeout(std::time::Duration),

    /// The pool has been closed.
    #[error("pool is closed")]
    Closed,

    /// The connection factory failed.
    #[error("failed to establish connection: {0}")]
    Connect(String),

    /// The requested transaction has no pinned connection.
    #[error("no connection pinned for transaction {0}")]
    NotPinned(u64),

    /// The pinned connection is already in use by another operation.
    #[error("pinned connection for transaction {0} is busy")]
    PinnedBusy(u64),
}
