//! The three-level metadata cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::CatalogError;
use crate::model::{TableDetail, TableEntry};
use crate::visibility::VisibilityFilters;

/// Source of catalog metadata (discovery queries over a live session).
///
/// Implemented by the integration layer on top of the connection pool;
/// inside a host-engine transaction the implementation must route these
/// queries through the transaction's pinned connection.
pub trait SchemaLoader: Send + Sync {
    /// Load all schema names.
    fn load_schemas(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, CatalogError>> + Send;

    /// Load the tables and views of one schema.
    fn load_tables(
        &self,
        schema: &str,
    ) -> impl Future<Output = Result<Vec<TableEntry>, CatalogError>> + Send;

    /// Load full column and key metadata for one table.
    fn load_table_detail(
        &self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = Result<TableDetail, CatalogError>> + Send;
}

struct Timed<T> {
    value: T,
    loaded_at: Instant,
}

impl<T> Timed<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            loaded_at: Instant::now(),
        }
    }
}

/// Lazily populated schema/table/column cache with per-level TTL expiry.
pub struct MetadataCache {
    /// Shared TTL; `None` means entries only leave via invalidation.
    ttl: Option<Duration>,
    filters: VisibilityFilters,
    schemas: Mutex<Option<Timed<Vec<String>>>>,
    tables: Mutex<HashMap<String, Timed<Vec<TableEntry>>>>,
    details: Mutex<HashMap<(String, String), Timed<TableDetail>>>,
}

impl MetadataCache {
    /// Cache with the given TTL (zero/None disables expiry) and filters.
    #[must_use]
    pub fn new(ttl: Option<Duration>, filters: VisibilityFilters) -> Self {
        let ttl = ttl.filter(|t| !t.is_zero());
        Self {
            ttl,
            filters,
            schemas: Mutex::new(None),
            tables: Mutex::new(HashMap::new()),
            details: Mutex::new(HashMap::new()),
        }
    }

    fn is_fresh<T>(&self, entry: &Timed<T>) -> bool {
        self.ttl.is_none_or(|ttl| entry.loaded_at.elapsed() < ttl)
    }

    /// Visible schema names, loading the level if stale or absent.
    pub async fn schemas<L: SchemaLoader>(
        &self,
        loader: &L,
    ) -> Result<Vec<String>, CatalogError> {
        if let Some(entry) = self.schemas.lock().as_ref() {
            if self.is_fresh(entry) {
                return Ok(self.filter_schemas(&entry.value));
            }
        }

        tracing::debug!("loading schema list");
        let loaded = loader.load_schemas().await?;
        let visible = self.filter_schemas(&loaded);
        *self.schemas.lock() = Some(Timed::new(loaded));
        Ok(visible)
    }

    fn filter_schemas(&self, schemas: &[String]) -> Vec<String> {
        schemas
            .iter()
            .filter(|s| self.filters.schema_visible(s))
            .cloned()
            .collect()
    }

    /// Visible tables of a schema, loading the level if stale or absent.
    pub async fn tables<L: SchemaLoader>(
        &self,
        loader: &L,
        schema: &str,
    ) -> Result<Vec<TableEntry>, CatalogError> {
        if !self.filters.schema_visible(schema) {
            return Err(CatalogError::SchemaNotFound(schema.to_string()));
        }

        if let Some(entry) = self.tables.lock().get(schema) {
            if self.is_fresh(entry) {
                return Ok(self.filter_tables(&entry.value));
            }
        }

        tracing::debug!(schema, "loading table list");
        let loaded = loader.load_tables(schema).await?;
        let visible = self.filter_tables(&loaded);
        self.tables
            .lock()
            .insert(schema.to_string(), Timed::new(loaded));
        Ok(visible)
    }

    fn filter_tables(&self, tables: &[TableEntry]) -> Vec<TableEntry> {
        tables
            .iter()
            .filter(|t| self.filters.table_visible(&t.name))
            .cloned()
            .collect()
    }

    /// Existence check from the table-name level only; never triggers a
    /// column-metadata round trip.
    pub async fn table_exists<L: SchemaLoader>(
        &self,
        loader: &L,
        schema: &str,
        table: &str,
    ) -> Result<bool, CatalogError> {
        let tables = self.tables(loader, schema).await?;
        Ok(tables.iter().any(|t| t.name.eq_ignore_ascii_case(table)))
    }

    /// Full metadata for one table, loading columns on first touch.
    pub async fn table_detail<L: SchemaLoader>(
        &self,
        loader: &L,
        schema: &str,
        table: &str,
    ) -> Result<TableDetail, CatalogError> {
        if !self.filters.schema_visible(schema) {
            return Err(CatalogError::SchemaNotFound(schema.to_string()));
        }
        if !self.filters.table_visible(table) {
            return Err(CatalogError::TableNotFound {
                schema: schema.to_string(),
                table: table.to_string(),
            });
        }

        let key = (schema.to_string(), table.to_string());
        if let Some(entry) = self.details.lock().get(&key) {
            if self.is_fresh(entry) {
                return Ok(entry.value.clone());
            }
        }

        // Existence comes from the (cheaper) table-name level first.
        if !self.table_exists(loader, schema, table).await? {
            return Err(CatalogError::TableNotFound {
                schema: schema.to_string(),
                table: table.to_string(),
            });
        }

        tracing::debug!(schema, table, "loading column metadata");
        let detail = loader.load_table_detail(schema, table).await?;
        self.details.lock().insert(key, Timed::new(detail.clone()));
        Ok(detail)
    }

    /// Invalidate the schema list (CREATE/DROP SCHEMA).
    pub fn invalidate_schemas(&self) {
        *self.schemas.lock() = None;
    }

    /// Invalidate one schema's table list (CREATE/DROP TABLE).
    pub fn invalidate_tables(&self, schema: &str) {
        self.tables.lock().remove(schema);
        self.details
            .lock()
            .retain(|(s, _), _| !s.eq_ignore_ascii_case(schema));
    }

    /// Invalidate one table's columns (ALTER TABLE).
    pub fn invalidate_table(&self, schema: &str, table: &str) {
        self.details.lock().retain(|(s, t), _| {
            !(s.eq_ignore_ascii_case(schema) && t.eq_ignore_ascii_case(table))
        });
    }

    /// Drop everything; the next access reloads.
    pub fn refresh(&self) {
        *self.schemas.lock() = None;
        self.tables.lock().clear();
        self.details.lock().clear();
        tracing::debug!("metadata cache cleared");
    }
}
