//! Catalog integration: bindings, scans, DML, bulk loads, transactions.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tds_types::SqlValue;
use tds_wire::ServerMessage;

use mssql_catalog::{
    CatalogError, MetadataCache, SchemaLoader, TableColumn, TableDetail, TableEntry,
    VisibilityFilters, queries,
};
use mssql_pool::{ManageConnection, PinnedConnection, Pool, PoolError, PooledConnection};
use mssql_session::{
    BulkColumn, BulkWriter, CancelToken, QueryStream, RowChunk, Session, SessionConfig,
    SessionError, bulk::insert_bulk_statement,
};

use crate::dml;
use crate::error::{BridgeError, Result};
use crate::expr::ScanFilter;
use crate::order::{OrderItem, OrderPushdown, try_push};
use crate::settings::BridgeSettings;
use crate::sqlgen::{Coverage, EncodeCtx, encode_filters};
use crate::types_map::{LogicalType, logical_type, rowid_logical_type, wire_type};

/// Pool factory producing authenticated sessions.
///
/// Azure routing redirects are followed here (bounded), and an expired
/// federated token is re-acquired through the credential source before
/// the next attempt.
pub struct SessionManager {
    config: SessionConfig,
}

/// Redirect bound for Azure routing loops.
const MAX_REDIRECTS: usize = 2;

impl SessionManager {
    /// Manager for one catalog's connection settings.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

impl ManageConnection for SessionManager {
    type Connection = Session;

    async fn connect(&self) -> std::result::Result<Session, PoolError> {
        let mut config = self.config.clone();
        for _ in 0..=MAX_REDIRECTS {
            match Session::connect(config.clone()).await {
                Ok(session) => return Ok(session),
                Err(SessionError::Routing { host, port }) => {
                    tracing::info!(%host, port, "following Azure routing redirect");
                    config.host = host;
                    config.port = port;
                }
                Err(e) => return Err(PoolError::Connect(e.to_string())),
            }
        }
        Err(PoolError::Connect("too many routing redirects".to_string()))
    }

    fn is_recyclable(&self, conn: &Session) -> bool {
        conn.is_recyclable()
    }

    async fn ping(&self, conn: &mut Session) -> bool {
        conn.ping().await
    }
}

/// A session checked out for a scan: plain pool checkout, or the
/// transaction's pinned connection.
pub enum ScanConn {
    /// Pool-owned connection, released on drop.
    Pooled(PooledConnection<SessionManager>),
    /// Transaction-pinned connection, returned to its pin slot on drop.
    Pinned(PinnedConnection<SessionManager>),
}

impl Deref for ScanConn {
    type Target = Session;

    fn deref(&self) -> &Session {
        match self {
            Self::Pooled(c) => c,
            Self::Pinned(c) => c,
        }
    }
}

impl DerefMut for ScanConn {
    fn deref_mut(&mut self) -> &mut Session {
        match self {
            Self::Pooled(c) => c,
            Self::Pinned(c) => c,
        }
    }
}

/// A bound table: the opaque bind data the host engine carries between
/// bind and execution.
#[derive(Debug, Clone)]
pub struct TableBinding {
    /// Catalog (attached database) name.
    pub catalog: String,
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Full column metadata.
    pub detail: TableDetail,
    /// Host logical types, in column order.
    pub column_types: Vec<LogicalType>,
    /// Rowid logical type (scalar or struct), when a primary key exists.
    pub rowid_type: Option<LogicalType>,
}

impl TableBinding {
    /// `[schema].[table]`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        dml::qualified_name(&self.schema, &self.table)
    }

    /// Column names in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.detail.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// An attached SQL Server database exposed to the host engine.
pub struct SqlServerCatalog {
    name: String,
    pool: Pool<SessionManager>,
    cache: MetadataCache,
    settings: BridgeSettings,
}

impl SqlServerCatalog {
    /// Attach a catalog: validate settings, compile visibility filters,
    /// and build the connection pool. No connection is opened yet.
    pub fn attach(
        name: impl Into<String>,
        mut config: SessionConfig,
        settings: BridgeSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let filters = VisibilityFilters::new(
            settings.schema_filter.as_deref(),
            settings.table_filter.as_deref(),
        )?;
        config.connect_timeout = settings.connection_timeout;

        let pool = Pool::new(SessionManager::new(config), settings.pool_config());
        let cache = MetadataCache::new(settings.cache_ttl(), filters);

        Ok(Self {
            name: name.into(),
            pool,
            cache,
            settings,
        })
    }

    /// Catalog name as attached.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective settings.
    #[must_use]
    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// The underlying pool (status, maintenance).
    #[must_use]
    pub fn pool(&self) -> &Pool<SessionManager> {
        &self.pool
    }

    fn loader(&self, transaction: Option<u64>) -> CatalogLoader<'_> {
        CatalogLoader {
            pool: &self.pool,
            transaction,
        }
    }

    async fn checkout(&self, transaction: Option<u64>) -> Result<ScanConn> {
        match transaction {
            Some(txn) => Ok(ScanConn::Pinned(self.pool.checkout_pinned(txn)?)),
            None => Ok(ScanConn::Pooled(self.pool.acquire().await?)),
        }
    }

    /// Visible schema names.
    pub async fn schemas(&self) -> Result<Vec<String>> {
        Ok(self.cache.schemas(&self.loader(None)).await?)
    }

    /// Visible tables of a schema.
    pub async fn tables(&self, schema: &str) -> Result<Vec<TableEntry>> {
        Ok(self.cache.tables(&self.loader(None), schema).await?)
    }

    /// Existence check from cached table names only.
    pub async fn table_exists(
        &self,
        schema: &str,
        table: &str,
        transaction: Option<u64>,
    ) -> Result<bool> {
        Ok(self
            .cache
            .table_exists(&self.loader(transaction), schema, table)
            .await?)
    }

    /// Bind a table for scanning or DML.
    ///
    /// Inside a host transaction the metadata lookups run on the pinned
    /// connection, never on a second pool slot.
    pub async fn bind_table(
        &self,
        schema: &str,
        table: &str,
        transaction: Option<u64>,
    ) -> Result<TableBinding> {
        let detail = self
            .cache
            .table_detail(&self.loader(transaction), schema, table)
            .await?;
        let column_types = detail.columns.iter().map(|c| logical_type(&c.ty)).collect();
        let rowid_type = rowid_logical_type(&detail)?;
        Ok(TableBinding {
            catalog: self.name.clone(),
            schema: schema.to_string(),
            table: table.to_string(),
            detail,
            column_types,
            rowid_type,
        })
    }

    /// Start a streaming scan.
    ///
    /// `projection` holds column ordinals to fetch (empty means all);
    /// `filters` is the host filter tree; `order` carries an ORDER BY /
    /// TOP N candidate found above the scan by the optimizer hook.
    pub async fn scan(
        &self,
        binding: &TableBinding,
        projection: &[usize],
        filters: &[ScanFilter],
        order: Option<(&[OrderItem], Option<u64>)>,
        transaction: Option<u64>,
    ) -> Result<TableScan> {
        let columns: &[TableColumn] = &binding.detail.columns;
        let rowid = binding.detail.rowid_kind();
        let ctx = EncodeCtx {
            columns,
            rowid: rowid.as_ref(),
        };

        let pushed = encode_filters(filters, &ctx);

        // ORDER BY / TOP N pushdown is opt-in.
        let order_result = match order {
            Some((items, limit)) if self.settings.order_pushdown => {
                try_push(items, limit, &ctx)
            }
            _ => OrderPushdown::None,
        };
        let (order_fragments, top, order_removed) = match &order_result {
            OrderPushdown::Full { fragments, limit } => {
                (Some(fragments.as_slice()), *limit, true)
            }
            // A partial push pre-sorts but the host sort stays; TOP would
            // change the result set, so it is not emitted.
            OrderPushdown::Partial { fragments, .. } => {
                (Some(fragments.as_slice()), None, false)
            }
            OrderPushdown::None => (None, None, false),
        };

        let names: Vec<&str> = if projection.is_empty() {
            binding.column_names()
        } else {
            projection
                .iter()
                .map(|i| {
                    columns
                        .get(*i)
                        .map(|c| c.name.as_str())
                        .ok_or_else(|| {
                            BridgeError::Binding(format!("projection ordinal {i} out of range"))
                        })
                })
                .collect::<Result<_>>()?
        };

        let sql = dml::build_select(
            &binding.qualified_name(),
            &names,
            pushed.clause.as_deref(),
            order_fragments,
            top,
        );
        tracing::debug!(catalog = %self.name, %sql, "starting scan");

        let conn = self.checkout(transaction).await?;
        let stream = QueryStream::start(conn, &sql).await?;
        Ok(TableScan {
            stream,
            filter_coverage: pushed.coverage,
            order_removed,
        })
    }

    /// INSERT host rows.
    pub async fn insert(
        &self,
        binding: &TableBinding,
        columns: &[&str],
        rows: &[Vec<SqlValue>],
        transaction: Option<u64>,
    ) -> Result<u64> {
        let sql = dml::insert_sql(&binding.qualified_name(), columns, rows)?;
        let mut conn = self.checkout(transaction).await?;
        Ok(conn.execute_rowcount(&sql).await?)
    }

    /// UPDATE rows matched by a fully-pushable predicate (typically a
    /// rowid filter produced by the host plan).
    pub async fn update(
        &self,
        binding: &TableBinding,
        assignments: &[(&str, SqlValue)],
        filters: &[ScanFilter],
        transaction: Option<u64>,
    ) -> Result<u64> {
        let clause = self.full_predicate(binding, filters)?;
        let sql = dml::update_sql(&binding.qualified_name(), assignments, &clause)?;
        let mut conn = self.checkout(transaction).await?;
        Ok(conn.execute_rowcount(&sql).await?)
    }

    /// DELETE rows matched by a fully-pushable predicate.
    pub async fn delete(
        &self,
        binding: &TableBinding,
        filters: &[ScanFilter],
        transaction: Option<u64>,
    ) -> Result<u64> {
        let clause = self.full_predicate(binding, filters)?;
        let sql = dml::delete_sql(&binding.qualified_name(), &clause);
        let mut conn = self.checkout(transaction).await?;
        Ok(conn.execute_rowcount(&sql).await?)
    }

    /// DML predicates must push completely: a dropped conjunct would
    /// widen the affected row set.
    fn full_predicate(
        &self,
        binding: &TableBinding,
        filters: &[ScanFilter],
    ) -> Result<String> {
        let rowid = binding.detail.rowid_kind();
        let ctx = EncodeCtx {
            columns: &binding.detail.columns,
            rowid: rowid.as_ref(),
        };
        let pushed = encode_filters(filters, &ctx);
        match (pushed.clause, pushed.coverage) {
            (Some(clause), Coverage::Full) => Ok(clause),
            _ => Err(BridgeError::Usage(
                "DML predicate is not fully expressible in T-SQL".to_string(),
            )),
        }
    }

    /// Create a table from host column definitions.
    ///
    /// `if_not_exists` and `or_replace` are mutually exclusive. With
    /// `if_not_exists` on an existing table this is a no-op.
    pub async fn create_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[(String, LogicalType, bool)],
        if_not_exists: bool,
        or_replace: bool,
        transaction: Option<u64>,
    ) -> Result<()> {
        if if_not_exists && or_replace {
            return Err(BridgeError::Usage(
                "IF NOT EXISTS and OR REPLACE cannot be combined".to_string(),
            ));
        }

        if or_replace {
            let drop = dml::drop_table_sql(schema, table, true);
            let mut conn = self.checkout(transaction).await?;
            conn.execute_rowcount(&drop).await?;
        }

        let sql = dml::create_table_sql(schema, table, columns, if_not_exists)?;
        let mut conn = self.checkout(transaction).await?;
        conn.execute_rowcount(&sql).await?;
        drop(conn);
        self.cache.invalidate_tables(schema);
        Ok(())
    }

    /// CTAS / `COPY ... CREATE_TABLE true`: create the target if needed
    /// and open a bulk-load job for the source rows.
    ///
    /// Returns `None` when the table already exists under
    /// `if_not_exists`: zero rows inserted, no DDL, no error.
    pub async fn create_table_as(
        &self,
        schema: &str,
        table: &str,
        columns: &[(String, LogicalType, bool)],
        if_not_exists: bool,
        tablock: Option<bool>,
        transaction: Option<u64>,
    ) -> Result<Option<BulkLoadJob>> {
        let exists = self.table_exists(schema, table, transaction).await?;
        if exists && if_not_exists {
            tracing::debug!(schema, table, "CTAS target exists; skipping");
            return Ok(None);
        }

        self.create_table(schema, table, columns, if_not_exists, false, transaction)
            .await?;

        let bulk_columns = columns
            .iter()
            .map(|(name, logical, nullable)| {
                BulkColumn::new(name.clone(), wire_type(logical)).with_nullable(*nullable)
            })
            .collect();
        self.open_bulk(schema, table, bulk_columns, true, tablock, transaction)
            .await
            .map(Some)
    }

    /// Open a bulk-load job into an existing table.
    pub async fn bulk_load(
        &self,
        binding: &TableBinding,
        tablock: Option<bool>,
        transaction: Option<u64>,
    ) -> Result<BulkLoadJob> {
        let bulk_columns = binding
            .detail
            .columns
            .iter()
            .filter(|c| !c.identity)
            .map(|c| BulkColumn::new(c.name.clone(), c.ty.clone()).with_nullable(c.nullable))
            .collect();
        self.open_bulk(
            &binding.schema,
            &binding.table,
            bulk_columns,
            false,
            tablock,
            transaction,
        )
        .await
    }

    /// Dispatch the `INSERT BULK` statement and hand back the writer.
    ///
    /// TABLOCK heuristic: an explicit option wins; otherwise it is set
    /// for freshly created targets (minimal logging) or when the global
    /// `copy_tablock` forces it.
    async fn open_bulk(
        &self,
        schema: &str,
        table: &str,
        columns: Vec<BulkColumn>,
        created_now: bool,
        tablock: Option<bool>,
        transaction: Option<u64>,
    ) -> Result<BulkLoadJob> {
        let tablock = tablock.unwrap_or(created_now || self.settings.copy_tablock);
        let qualified = dml::qualified_name(schema, table);
        let statement = insert_bulk_statement(&qualified, &columns, tablock);

        let mut conn = self.checkout(transaction).await?;
        tracing::debug!(%statement, "dispatching INSERT BULK");
        conn.execute_rowcount(&statement).await?;

        Ok(BulkLoadJob {
            conn,
            writer: BulkWriter::new(columns),
        })
    }

    /// Begin a host-engine transaction: one connection is pinned to it
    /// until commit or rollback.
    pub async fn begin_transaction(&self, transaction: u64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        conn.begin_transaction().await?;
        self.pool.pin(transaction, conn);
        Ok(())
    }

    /// Commit and release the pinned connection.
    pub async fn commit_transaction(&self, transaction: u64) -> Result<()> {
        let mut conn = self.pool.unpin(transaction)?;
        conn.commit().await?;
        Ok(())
    }

    /// Roll back and release the pinned connection.
    pub async fn rollback_transaction(&self, transaction: u64) -> Result<()> {
        let mut conn = self.pool.unpin(transaction)?;
        conn.rollback().await?;
        Ok(())
    }

    /// Point-wise invalidation hooks for DDL executed through the
    /// extension.
    pub fn invalidate_after_ddl(&self, schema: Option<&str>, table: Option<&str>) {
        match (schema, table) {
            (Some(schema), Some(table)) => self.cache.invalidate_table(schema, table),
            (Some(schema), None) => self.cache.invalidate_tables(schema),
            _ => self.cache.invalidate_schemas(),
        }
    }

    /// Force a full metadata reload on next access.
    pub fn refresh_metadata(&self) {
        self.cache.refresh();
    }

    /// One pool maintenance sweep (idle eviction + keepalive).
    pub async fn run_pool_maintenance(&self) {
        self.pool.run_maintenance().await;
    }
}

/// Metadata loader running discovery queries through the pool, honoring
/// transaction pinning for lookups inside a host transaction.
struct CatalogLoader<'a> {
    pool: &'a Pool<SessionManager>,
    transaction: Option<u64>,
}

fn load_err(e: impl std::fmt::Display) -> CatalogError {
    CatalogError::Load(e.to_string())
}

impl CatalogLoader<'_> {
    async fn run(&self, sql: &str) -> std::result::Result<Vec<Vec<SqlValue>>, CatalogError> {
        match self.transaction {
            Some(txn) => {
                let mut conn = self.pool.checkout_pinned(txn).map_err(load_err)?;
                let (_, rows) = conn.query_rows(sql).await.map_err(load_err)?;
                Ok(rows)
            }
            None => {
                let mut conn = self.pool.acquire().await.map_err(load_err)?;
                let (_, rows) = conn.query_rows(sql).await.map_err(load_err)?;
                Ok(rows)
            }
        }
    }
}

impl SchemaLoader for CatalogLoader<'_> {
    async fn load_schemas(&self) -> std::result::Result<Vec<String>, CatalogError> {
        let rows = self.run(queries::SCHEMAS_SQL).await?;
        queries::schemas_from_rows(&rows)
    }

    async fn load_tables(
        &self,
        schema: &str,
    ) -> std::result::Result<Vec<TableEntry>, CatalogError> {
        let rows = self.run(&queries::tables_sql(schema)).await?;
        queries::tables_from_rows(&rows)
    }

    async fn load_table_detail(
        &self,
        schema: &str,
        table: &str,
    ) -> std::result::Result<TableDetail, CatalogError> {
        let qualified = format!("{schema}.{table}");
        let column_rows = self.run(&queries::columns_sql(schema, table)).await?;
        let columns = queries::columns_from_rows(&qualified, &column_rows)?;
        let key_rows = self.run(&queries::primary_key_sql(schema, table)).await?;
        let primary_key = queries::primary_key_from_rows(&key_rows)?;

        // Whether the object is a view comes from the table-name level;
        // the column query works for both.
        Ok(TableDetail {
            schema: schema.to_string(),
            name: table.to_string(),
            is_view: false,
            columns: columns.into(),
            primary_key,
        })
    }
}

/// A streaming scan handed to the host engine.
pub struct TableScan {
    stream: QueryStream<ScanConn>,
    /// How much of the filter tree the pushed WHERE clause covers; the
    /// host re-applies its filters unless this is [`Coverage::Full`].
    pub filter_coverage: Coverage,
    /// True when a full ORDER BY/TOP N push removed the host's sort node.
    pub order_removed: bool,
}

impl TableScan {
    /// Column metadata of the result, once streaming has begun.
    #[must_use]
    pub fn columns(&self) -> Option<&Arc<[tds_wire::ColumnMeta]>> {
        self.stream.columns()
    }

    /// Fill a chunk; 0 rows means end of stream.
    pub async fn next_chunk(&mut self, chunk: &mut RowChunk) -> Result<usize> {
        Ok(self.stream.fill_chunk(chunk).await?)
    }

    /// Warnings observed since the last call, for the host warning
    /// channel.
    pub fn take_warnings(&mut self) -> Vec<ServerMessage> {
        self.stream.take_warnings()
    }

    /// Cancellation trigger for the host interrupt path.
    pub fn cancel_token(&self) -> Result<CancelToken> {
        Ok(self.stream.cancel_token()?)
    }
}

/// An in-flight bulk load: buffered writer plus the connection that will
/// carry the BULK_LOAD message.
pub struct BulkLoadJob {
    conn: ScanConn,
    writer: BulkWriter,
}

impl BulkLoadJob {
    /// Append rows (thread-safe; serialized internally).
    pub fn write_rows(&self, rows: &[Vec<SqlValue>]) -> Result<()> {
        Ok(self.writer.write_rows(rows)?)
    }

    /// Rows buffered so far.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.writer.total_rows()
    }

    /// Ship the batch and return the server-acknowledged row count.
    pub async fn finish(mut self) -> Result<u64> {
        let count = self.writer.flush_batch(&mut self.conn).await?;
        Ok(count)
    }
}
