//! # mssql-bridge
//!
//! The host-engine-facing surface of the SQL Server integration.
//!
//! An attached database becomes a [`SqlServerCatalog`]: table bindings
//! carry column metadata and the synthetic rowid shape, scans stream rows
//! through the pooled TDS sessions, and DML/CTAS/COPY operations translate
//! into T-SQL (or the bulk-load wire protocol).
//!
//! The pushdown encoder translates host filter trees into T-SQL WHERE
//! clauses with partial-pushdown semantics, rewrites rowid predicates
//! against the underlying primary key, and (when enabled) folds ORDER BY
//! and TOP N into the emitted SELECT.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod catalog;
pub mod dml;
pub mod error;
pub mod expr;
pub mod order;
pub mod settings;
pub mod sqlgen;
pub mod types_map;

pub use catalog::{BulkLoadJob, ScanConn, SessionManager, SqlServerCatalog, TableBinding, TableScan};
pub use error::BridgeError;
pub use expr::{ColRef, CompareOp, FilterValue, MatchKind, PushExpr, RowIdValue, ScanFilter};
pub use mssql_session::RowChunk;
pub use order::{NullOrder, OrderExpr, OrderItem, OrderPushdown};
pub use settings::BridgeSettings;
pub use sqlgen::{Coverage, PushdownSql};
pub use types_map::LogicalType;
