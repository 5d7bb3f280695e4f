//! # tds-types
//!
//! SQL Server value model and TDS wire-format codecs.
//!
//! This crate owns the mapping between TDS binary column data and Rust
//! values. It is IO-free: decoders operate on byte slices and report
//! [`TypeError::Incomplete`] when a value straddles the end of the input,
//! which higher layers use to resume parsing once more packet data arrives.
//!
//! Date and time decoding is scale-aware for `TIME`, `DATETIME2`, and
//! `DATETIMEOFFSET` at scales 0 through 7; the per-column scale must be
//! threaded through from column metadata on every path.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod collation;
pub mod decode;
pub mod encode;
pub mod error;
pub mod typeinfo;
pub mod value;

pub use collation::Collation;
pub use decode::decode_value;
pub use error::TypeError;
pub use typeinfo::{ColumnType, TypeId};
pub use value::SqlValue;
