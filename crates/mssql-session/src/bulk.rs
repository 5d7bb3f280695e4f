//! Bulk-load (BCP) writer.
//!
//! Assembles an `INSERT BULK` wire payload: a COLMETADATA token, one ROW
//! token per row, and a final DONE. The payload ships as a BULK_LOAD
//! message after the `INSERT BULK` statement has been accepted.
//!
//! `write_rows` takes `&self` behind a mutex so the host engine can
//! stream from several worker threads into one batch; flushing and the
//! response read are strictly sequential.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tds_types::typeinfo::decimal_bytes_for_precision;
use tds_types::{Collation, ColumnType, SqlValue, TypeId, encode::encode_value};
use tds_wire::token::{Done, DoneStatus, TokenType};

use crate::error::{Result, SessionError};
use crate::session::Session;

/// A column participating in a bulk load.
#[derive(Debug, Clone)]
pub struct BulkColumn {
    /// Column name.
    pub name: String,
    /// Wire type descriptor.
    pub ty: ColumnType,
    /// Whether NULLs are allowed.
    pub nullable: bool,
}

impl BulkColumn {
    /// A nullable bulk column.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
        }
    }

    /// Set nullability.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// T-SQL type declaration for the `INSERT BULK` statement.
    #[must_use]
    pub fn declaration(&self) -> String {
        let ty = &self.ty;
        match ty.type_id {
            TypeId::Bit | TypeId::BitN => "BIT".to_string(),
            TypeId::Int1 => "TINYINT".to_string(),
            TypeId::Int2 => "SMALLINT".to_string(),
            TypeId::Int4 => "INT".to_string(),
            TypeId::Int8 => "BIGINT".to_string(),
            TypeId::IntN => match ty.max_length {
                Some(1) => "TINYINT".to_string(),
                Some(2) => "SMALLINT".to_string(),
                Some(8) => "BIGINT".to_string(),
                _ => "INT".to_string(),
            },
            TypeId::Float4 => "REAL".to_string(),
            TypeId::Float8 => "FLOAT".to_string(),
            TypeId::FloatN => match ty.max_length {
                Some(4) => "REAL".to_string(),
                _ => "FLOAT".to_string(),
            },
            TypeId::Money | TypeId::MoneyN => "MONEY".to_string(),
            TypeId::Money4 => "SMALLMONEY".to_string(),
            TypeId::DecimalN | TypeId::NumericN => format!(
                "DECIMAL({},{})",
                ty.precision.unwrap_or(18),
                ty.scale.unwrap_or(0)
            ),
            TypeId::Guid => "UNIQUEIDENTIFIER".to_string(),
            TypeId::Date => "DATE".to_string(),
            TypeId::Time => format!("TIME({})", ty.temporal_scale()),
            TypeId::DateTime2 => format!("DATETIME2({})", ty.temporal_scale()),
            TypeId::DateTimeOffset => format!("DATETIMEOFFSET({})", ty.temporal_scale()),
            TypeId::DateTime | TypeId::DateTimeN => "DATETIME".to_string(),
            TypeId::DateTime4 => "SMALLDATETIME".to_string(),
            TypeId::NVarChar | TypeId::NChar => {
                if ty.is_plp() {
                    "NVARCHAR(MAX)".to_string()
                } else {
                    // max_length is in bytes; NVARCHAR lengths are in
                    // characters.
                    format!("NVARCHAR({})", ty.max_length.unwrap_or(8000) / 2)
                }
            }
            TypeId::BigVarChar | TypeId::BigChar => {
                if ty.is_plp() {
                    "VARCHAR(MAX)".to_string()
                } else {
                    format!("VARCHAR({})", ty.max_length.unwrap_or(8000))
                }
            }
            TypeId::BigVarBinary | TypeId::BigBinary => {
                if ty.is_plp() {
                    "VARBINARY(MAX)".to_string()
                } else {
                    format!("VARBINARY({})", ty.max_length.unwrap_or(8000))
                }
            }
        }
    }
}

/// Bracket-quote an identifier, doubling any `]`.
fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Build the `INSERT BULK` statement dispatched before the BULK_LOAD
/// message. `table` is the already-qualified target name.
#[must_use]
pub fn insert_bulk_statement(table: &str, columns: &[BulkColumn], tablock: bool) -> String {
    let cols: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.declaration()))
        .collect();
    let mut sql = format!("INSERT BULK {} ({})", table, cols.join(", "));
    let mut hints = vec!["KEEP_NULLS".to_string()];
    if tablock {
        hints.push("TABLOCK".to_string());
    }
    sql.push_str(&format!(" WITH ({})", hints.join(", ")));
    sql
}

/// Accumulates bulk rows and ships them as one BULK_LOAD message.
pub struct BulkWriter {
    columns: Arc<[BulkColumn]>,
    buffer: Mutex<BytesMut>,
    total_rows: AtomicU64,
}

impl BulkWriter {
    /// Create a writer; the COLMETADATA token is buffered immediately.
    #[must_use]
    pub fn new(columns: Vec<BulkColumn>) -> Self {
        let mut buffer = BytesMut::with_capacity(64 * 1024);
        write_colmetadata(&mut buffer, &columns);
        Self {
            columns: columns.into(),
            buffer: Mutex::new(buffer),
            total_rows: AtomicU64::new(0),
        }
    }

    /// The target column layout.
    #[must_use]
    pub fn columns(&self) -> &[BulkColumn] {
        &self.columns
    }

    /// Rows buffered so far.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.total_rows.load(Ordering::Acquire)
    }

    /// Bytes buffered so far.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Append one ROW token per row.
    ///
    /// Serialized internally; callers on different worker threads may
    /// interleave batches of rows.
    pub fn write_rows(&self, rows: &[Vec<SqlValue>]) -> Result<()> {
        let mut buffer = self.buffer.lock();
        for row in rows {
            if row.len() != self.columns.len() {
                return Err(SessionError::Config(format!(
                    "bulk row has {} values, table has {} columns",
                    row.len(),
                    self.columns.len()
                )));
            }
            buffer.put_u8(TokenType::Row as u8);
            for (column, value) in self.columns.iter().zip(row) {
                if value.is_null() && !column.nullable {
                    return Err(SessionError::Config(format!(
                        "NULL in non-nullable bulk column `{}`",
                        column.name
                    )));
                }
                encode_value(&mut buffer, &column.ty, value).map_err(|e| {
                    SessionError::Config(format!(
                        "cannot encode column `{}`: {e}",
                        column.name
                    ))
                })?;
            }
            self.total_rows.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Append the final DONE and ship the batch.
    ///
    /// Returns the server-reported row count. On server error the session
    /// is left destroyed (bulk state is not recoverable).
    pub async fn flush_batch(self, session: &mut Session) -> Result<u64> {
        let total = self.total_rows.load(Ordering::Acquire);
        let mut buffer = self.buffer.into_inner();
        Done {
            status: DoneStatus {
                count: true,
                ..Default::default()
            },
            cur_cmd: Done::CMD_INSERT,
            row_count: total,
        }
        .encode(&mut buffer);

        tracing::debug!(
            rows = total,
            bytes = buffer.len(),
            "flushing bulk batch"
        );
        let payload: Bytes = buffer.freeze();
        let server_count = session.execute_bulk(payload).await?;
        if server_count != total {
            tracing::warn!(
                sent = total,
                acknowledged = server_count,
                "bulk row count mismatch"
            );
        }
        Ok(server_count)
    }
}

/// Serialize the COLMETADATA token for the bulk column set.
fn write_colmetadata(buf: &mut BytesMut, columns: &[BulkColumn]) {
    buf.put_u8(TokenType::ColMetaData as u8);
    buf.put_u16_le(columns.len() as u16);

    for column in columns {
        buf.put_u32_le(0); // user type
        let flags: u16 = if column.nullable { 0x0001 } else { 0x0000 };
        buf.put_u16_le(flags);
        buf.put_u8(column.ty.type_id as u8);

        match column.ty.type_id {
            // Fixed-width types carry no descriptor.
            TypeId::Int1
            | TypeId::Bit
            | TypeId::Int2
            | TypeId::Int4
            | TypeId::Int8
            | TypeId::Float4
            | TypeId::Float8
            | TypeId::Money
            | TypeId::Money4
            | TypeId::DateTime
            | TypeId::DateTime4
            | TypeId::Date => {}

            TypeId::IntN | TypeId::BitN | TypeId::FloatN | TypeId::MoneyN
            | TypeId::DateTimeN => {
                buf.put_u8(column.ty.max_length.unwrap_or(8) as u8);
            }

            TypeId::Guid => buf.put_u8(16),

            TypeId::DecimalN | TypeId::NumericN => {
                let precision = column.ty.precision.unwrap_or(18);
                buf.put_u8(decimal_bytes_for_precision(precision) + 1);
                buf.put_u8(precision);
                buf.put_u8(column.ty.scale.unwrap_or(0));
            }

            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                buf.put_u8(column.ty.temporal_scale());
            }

            TypeId::NVarChar | TypeId::NChar | TypeId::BigVarChar | TypeId::BigChar => {
                buf.put_u16_le(column.ty.max_length.unwrap_or(8000) as u16);
                let collation = column
                    .ty
                    .collation
                    .unwrap_or(Collation::LATIN1_GENERAL_CI_AS);
                buf.put_u32_le(collation.lcid);
                buf.put_u8(collation.sort_id);
            }

            TypeId::BigVarBinary | TypeId::BigBinary => {
                buf.put_u16_le(column.ty.max_length.unwrap_or(8000) as u16);
            }
        }

        tds_wire::codec::write_b_varchar(buf, &column.name);
    }
}
