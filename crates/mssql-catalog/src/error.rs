//! Catalog errors.

use thiserror::Error;

/// Errors raised by catalog lookups.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The schema does not exist (or is hidden by a visibility filter).
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    /// The table does not exist (or is hidden by a visibility filter).
    #[error("table not found: {schema}.{table}")]
    TableNotFound {
        /// Schema name.
        schema: String,
        /// Table name.
        table: String,
    },

    /// A column uses a type the integration cannot map.
    #[error("column {table}.{column} has unsupported type {sql_type}")]
    UnsupportedColumnType {
        /// Qualified table name.
        table: String,
        /// Column name.
        column: String,
        /// SQL type name as reported by sys.types.
        sql_type: String,
    },

    /// A visibility filter pattern failed to compile.
    #[error("invalid filter pattern `{pattern}`: {detail}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Regex compiler diagnostic.
        detail: String,
    },

    /// A discovery query failed or returned malformed rows.
    #[error("metadata load failed: {0}")]
    Load(String),
}
