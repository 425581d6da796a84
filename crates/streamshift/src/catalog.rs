//! Schema catalog
//!
//! Owns the per-table metadata cache. On the first event for a table the
//! catalog checks the target store; a missing table is created either by
//! cloning its definition from the source catalog or, when the source cannot
//! describe it, by inferring column types from the event's row image. The
//! primary key is then read back from the target and cached for the lifetime
//! of the process.
//!
//! Concurrent first sightings of the same table share one initialisation via a
//! per-table [`OnceCell`]; a failed initialisation leaves the cell empty so the
//! next event retries.

use dashmap::DashMap;
use std::sync::Arc;
use streamshift_rdbc::connection::Connection;
use streamshift_rdbc::dialect::{ColumnDefinition, SqlDialect};
use streamshift_rdbc::schema::SchemaProvider;
use streamshift_rdbc::{Row, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::coercion::{ISO_DATE, ISO_DATETIME_PREFIX};
use crate::error::{ReplicationError, Result};
use crate::stats::ReplicationStats;
use crate::types::TableId;

/// How a cached table came to exist on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOrigin {
    /// Already present on the target
    Existing,
    /// Created from the source catalog definition
    SourceCatalog,
    /// Created from sample row data (no lengths, precision or key)
    SampleInference,
}

/// Cached metadata for one replicated table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    /// Table identity
    pub table: TableId,
    /// Primary key columns in key order; empty when no key is known
    pub primary_key: Vec<String>,
    /// How the table came to exist
    pub origin: TableOrigin,
}

impl TableMetadata {
    /// Whether a natural key is known for this table
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }
}

type CacheCell = Arc<OnceCell<Arc<TableMetadata>>>;

/// Per-table metadata cache and target table bootstrapper
pub struct SchemaCatalog {
    source: Arc<dyn SchemaProvider>,
    target: Arc<dyn SchemaProvider>,
    target_conn: Arc<dyn Connection>,
    dialect: Arc<dyn SqlDialect>,
    source_schema: Option<String>,
    target_schema: Option<String>,
    lenient_table_lookup: bool,
    stats: Arc<ReplicationStats>,
    cache: DashMap<TableId, CacheCell>,
}

impl SchemaCatalog {
    /// Create a catalog over a source catalog, the target catalog and the
    /// target connection used for DDL
    pub fn new(
        source: Arc<dyn SchemaProvider>,
        target: Arc<dyn SchemaProvider>,
        target_conn: Arc<dyn Connection>,
        dialect: Arc<dyn SqlDialect>,
    ) -> Self {
        Self {
            source,
            target,
            target_conn,
            dialect,
            source_schema: None,
            target_schema: None,
            lenient_table_lookup: false,
            stats: Arc::new(ReplicationStats::new()),
            cache: DashMap::new(),
        }
    }

    /// Schema to introspect on the source (provider default when unset)
    pub fn with_source_schema(mut self, schema: impl Into<String>) -> Self {
        self.source_schema = Some(schema.into());
        self
    }

    /// Schema to check and create tables in on the target (provider default when unset)
    pub fn with_target_schema(mut self, schema: impl Into<String>) -> Self {
        self.target_schema = Some(schema.into());
        self
    }

    /// Fall back to matching cached tables by name alone when the
    /// `(database, table)` pair is not cached.
    ///
    /// Identically named tables from different source databases resolve to
    /// whichever was cached first.
    pub fn with_lenient_table_lookup(mut self, lenient: bool) -> Self {
        self.lenient_table_lookup = lenient;
        self
    }

    /// Share a statistics sink
    pub fn with_stats(mut self, stats: Arc<ReplicationStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Number of cached tables
    pub fn cached_tables(&self) -> usize {
        self.cache.iter().filter(|e| e.value().initialized()).count()
    }

    /// Cached metadata for a table, if it has been ensured
    pub fn get(&self, table: &TableId) -> Option<Arc<TableMetadata>> {
        self.cache.get(table).and_then(|cell| cell.get().cloned())
    }

    /// Make sure `table` exists on the target and return its metadata.
    ///
    /// `sample` is the event's row image, used only when the source catalog
    /// cannot describe the table.
    pub async fn ensure_table_exists(
        &self,
        table: &TableId,
        sample: Option<&Row>,
    ) -> Result<Arc<TableMetadata>> {
        let cell: CacheCell = self.cache.entry(table.clone()).or_default().clone();
        let meta = cell
            .get_or_try_init(|| self.load_table(table, sample))
            .await?;
        Ok(meta.clone())
    }

    async fn load_table(&self, table: &TableId, sample: Option<&Row>) -> Result<Arc<TableMetadata>> {
        let target_schema = self.target_schema.as_deref();

        let origin = if self
            .target
            .table_exists(target_schema, &table.table)
            .await?
        {
            debug!(table = %table, "Target table already exists");
            TableOrigin::Existing
        } else {
            self.create_table(table, sample).await?
        };

        let primary_key = self
            .target
            .get_primary_key(target_schema, &table.table)
            .await?;

        debug!(table = %table, primary_key = ?primary_key, origin = ?origin, "Cached table metadata");

        Ok(Arc::new(TableMetadata {
            table: table.clone(),
            primary_key,
            origin,
        }))
    }

    async fn create_table(&self, table: &TableId, sample: Option<&Row>) -> Result<TableOrigin> {
        let (ddl, origin) = match self.ddl_from_source(table).await {
            Ok(ddl) => (ddl, TableOrigin::SourceCatalog),
            Err(e) => {
                warn!(
                    table = %table,
                    error = %e,
                    "Source catalog unavailable, inferring table from sample row (degraded: no lengths, precision or primary key)"
                );
                (self.ddl_from_sample(table, sample)?, TableOrigin::SampleInference)
            }
        };

        debug!(table = %table, sql = %ddl, "Creating target table");
        self.target_conn
            .execute(&ddl, &[])
            .await
            .map_err(|source| ReplicationError::DdlExecution {
                table: table.table.clone(),
                source,
            })?;

        self.stats
            .record_table_created(origin == TableOrigin::SampleInference);
        info!(table = %table, origin = ?origin, "Created target table");
        Ok(origin)
    }

    async fn ddl_from_source(&self, table: &TableId) -> Result<String> {
        let introspection_error = |message: String| ReplicationError::SchemaIntrospection {
            table: table.table.clone(),
            message,
        };

        let meta = self
            .source
            .get_table(self.source_schema.as_deref(), &table.table)
            .await
            .map_err(|e| introspection_error(e.to_string()))?;

        let meta = match meta {
            Some(meta) if !meta.columns.is_empty() => meta,
            _ => return Err(introspection_error("table not found in source catalog".into())),
        };

        let columns: Vec<ColumnDefinition> = meta
            .columns
            .iter()
            .map(|column| {
                let data_type = self.dialect.native_type(column).unwrap_or_else(|| {
                    warn!(
                        table = %table,
                        column = %column.name,
                        source_type = %column.type_name,
                        "Unrecognized source column type, mapping to TEXT"
                    );
                    "TEXT".to_string()
                });
                let definition = ColumnDefinition::new(&column.name, data_type);
                if column.nullable {
                    definition
                } else {
                    definition.not_null()
                }
            })
            .collect();

        let primary_key: Vec<String> = meta
            .primary_key_columns()
            .into_iter()
            .map(|c| c.name.clone())
            .collect();

        Ok(self.dialect.create_table_sql(
            self.target_schema.as_deref(),
            &table.table,
            &columns,
            &primary_key,
        ))
    }

    fn ddl_from_sample(&self, table: &TableId, sample: Option<&Row>) -> Result<String> {
        let sample = sample.ok_or_else(|| ReplicationError::NoSample {
            table: table.table.clone(),
        })?;

        let columns: Vec<ColumnDefinition> = sample
            .iter()
            .map(|(name, value)| ColumnDefinition::new(name, infer_sample_type(value)))
            .collect();

        Ok(self.dialect.create_table_sql(
            self.target_schema.as_deref(),
            &table.table,
            &columns,
            &[],
        ))
    }

    /// Resolve primary-key values for `table`.
    ///
    /// Values are read from `new` when it has any columns, else from `old`.
    /// Only key columns with a non-null value are returned, in key order.
    pub fn extract_primary_key_values(&self, table: &TableId, old: &Row, new: &Row) -> Row {
        let Some(meta) = self.lookup(table) else {
            warn!(table = %table, "No cached metadata for table, cannot resolve primary key");
            return Row::empty();
        };

        let source = if new.is_empty() { old } else { new };
        let key: Row = meta
            .primary_key
            .iter()
            .filter_map(|column| match source.get_by_name(column) {
                Some(value) if !value.is_null() => Some((column.clone(), value.clone())),
                _ => None,
            })
            .collect();

        if key.is_empty() {
            warn!(
                table = %table,
                primary_key = ?meta.primary_key,
                "No primary key values found in row"
            );
        }
        key
    }

    fn lookup(&self, table: &TableId) -> Option<Arc<TableMetadata>> {
        if let Some(meta) = self.get(table) {
            return Some(meta);
        }
        if !self.lenient_table_lookup {
            return None;
        }

        let found = self
            .cache
            .iter()
            .filter(|entry| entry.key().table == table.table)
            .find_map(|entry| entry.value().get().cloned());
        if let Some(meta) = &found {
            debug!(
                table = %table,
                matched = %meta.table,
                "Resolved table metadata by name only"
            );
        }
        found
    }
}

/// Target DDL type for a sample value
pub fn infer_sample_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "TEXT",
        Value::Bool(_) => "BOOLEAN",
        Value::Int32(_) => "INTEGER",
        Value::Int64(_) => "BIGINT",
        Value::Float64(_) => "DOUBLE PRECISION",
        Value::String(s) if ISO_DATETIME_PREFIX.is_match(s) => "TIMESTAMP",
        Value::String(s) if ISO_DATE.is_match(s) => "DATE",
        _ => "TEXT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_sample_type() {
        assert_eq!(infer_sample_type(&Value::Null), "TEXT");
        assert_eq!(infer_sample_type(&Value::Bool(false)), "BOOLEAN");
        assert_eq!(infer_sample_type(&Value::Int32(1)), "INTEGER");
        assert_eq!(infer_sample_type(&Value::Int64(1 << 40)), "BIGINT");
        assert_eq!(infer_sample_type(&Value::Float64(0.5)), "DOUBLE PRECISION");
        assert_eq!(
            infer_sample_type(&Value::from("2024-01-02T03:04:05Z")),
            "TIMESTAMP"
        );
        assert_eq!(infer_sample_type(&Value::from("2024-01-02")), "DATE");
        assert_eq!(infer_sample_type(&Value::from("2024-01-02 03:04")), "TEXT");
        assert_eq!(
            infer_sample_type(&Value::Json(serde_json::json!({"a": 1}))),
            "TEXT"
        );
    }

    #[test]
    fn test_infer_sample_type_requires_ascii_digits() {
        assert_eq!(
            infer_sample_type(&Value::from("\u{0662}\u{0660}\u{0662}\u{0664}-01-02T03:04:05")),
            "TEXT"
        );
        assert_eq!(infer_sample_type(&Value::from("2024-01-0\u{0662}")), "TEXT");
    }

    #[test]
    fn test_table_metadata_key() {
        let meta = TableMetadata {
            table: TableId::new("inventory", "users"),
            primary_key: vec!["id".into()],
            origin: TableOrigin::Existing,
        };
        assert!(meta.has_primary_key());
    }
}
