//! # mssql-pool
//!
//! Per-catalog connection pool.
//!
//! The pool hands out connections LIFO (newest idle first, to keep server
//! session caches warm), enforces a capacity and an acquire deadline,
//! evicts idle connections past their TTL, and supports transaction
//! pinning: once a host-engine transaction begins, every operation in it
//! (including schema lookups) reuses the one pinned connection.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use pool::{ManageConnection, PinnedConnection, Pool, PoolStatus, PooledConnection};
