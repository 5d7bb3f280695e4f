//! # mssql-catalog
//!
//! Metadata discovery and caching for attached SQL Server databases.
//!
//! The cache is three-level — schemas, table names per schema, columns per
//! table — each populated lazily on first access and expired independently
//! against a shared TTL. DDL executed through the integration invalidates
//! the affected level point-wise; a manual refresh clears everything.
//! Optional case-insensitive regular expressions filter which schemas and
//! tables are visible at all.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod error;
pub mod model;
pub mod queries;
pub mod visibility;

pub use cache::{MetadataCache, SchemaLoader};
pub use error::CatalogError;
pub use model::{PrimaryKey, RowIdKind, TableColumn, TableDetail, TableEntry};
pub use visibility::VisibilityFilters;
