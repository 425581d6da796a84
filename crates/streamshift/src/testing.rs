//! Test doubles for replication without a database
//!
//! - [`RecordingConnection`]: captures every statement and its parameters,
//!   with scripted affected-row counts and failures
//! - [`StaticSchemaProvider`]: in-memory catalog
//! - [`MemoryTableSink`]: in-memory tables honouring upsert vs insert semantics
//!
//! # Example
//!
//! ```rust,ignore
//! let conn = Arc::new(RecordingConnection::new());
//! let sink = SqlTableSink::new(conn.clone(), Arc::new(PostgresDialect));
//! sink.insert("users", &Row::empty().with("id", 1)).await?;
//! assert_eq!(conn.executed().len(), 1);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use streamshift_rdbc::connection::Connection;
use streamshift_rdbc::schema::SchemaProvider;
use streamshift_rdbc::types::TableMetadata;
use streamshift_rdbc::{Error, Row, Value};

use crate::applier::TableSink;
use crate::error::{ReplicationError, Result};

// ============================================================================
// Recording connection
// ============================================================================

/// A statement seen by [`RecordingConnection`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    /// SQL text as passed to the connection
    pub sql: String,
    /// Bound parameters
    pub params: Vec<Value>,
}

/// Connection that records statements instead of running them
#[derive(Debug)]
pub struct RecordingConnection {
    executed: Mutex<Vec<RecordedStatement>>,
    queried: Mutex<Vec<RecordedStatement>>,
    affected: Mutex<VecDeque<u64>>,
    default_affected: u64,
    failures: Mutex<VecDeque<Error>>,
    query_results: Mutex<VecDeque<Vec<Row>>>,
}

impl Default for RecordingConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingConnection {
    /// Create a connection reporting one affected row per statement
    pub fn new() -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            queried: Mutex::new(Vec::new()),
            affected: Mutex::new(VecDeque::new()),
            default_affected: 1,
            failures: Mutex::new(VecDeque::new()),
            query_results: Mutex::new(VecDeque::new()),
        }
    }

    /// Affected-row count reported when nothing is scripted
    pub fn with_default_affected(mut self, rows: u64) -> Self {
        self.default_affected = rows;
        self
    }

    /// Script the affected-row count of the next successful `execute`
    pub fn push_affected(&self, rows: u64) {
        self.affected.lock().push_back(rows);
    }

    /// Fail the next `execute` or `query` with `error`
    pub fn fail_next(&self, error: Error) {
        self.failures.lock().push_back(error);
    }

    /// Script the rows returned by the next `query`
    pub fn push_query_result(&self, rows: Vec<Row>) {
        self.query_results.lock().push_back(rows);
    }

    /// Statements passed to `execute`, in order, including failed ones
    pub fn executed(&self) -> Vec<RecordedStatement> {
        self.executed.lock().clone()
    }

    /// Statements passed to `query`, in order
    pub fn queried(&self) -> Vec<RecordedStatement> {
        self.queried.lock().clone()
    }

    /// Forget recorded statements
    pub fn clear(&self) {
        self.executed.lock().clear();
        self.queried.lock().clear();
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> streamshift_rdbc::Result<Vec<Row>> {
        self.queried.lock().push(RecordedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.query_results.lock().pop_front().unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> streamshift_rdbc::Result<u64> {
        self.executed.lock().push(RecordedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self
            .affected
            .lock()
            .pop_front()
            .unwrap_or(self.default_affected))
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> streamshift_rdbc::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Static schema provider
// ============================================================================

/// In-memory catalog keyed by table name.
///
/// The schema argument does not affect lookups; it is recorded so tests can
/// check which schema was asked for.
#[derive(Debug, Default)]
pub struct StaticSchemaProvider {
    tables: Mutex<HashMap<String, TableMetadata>>,
    primary_keys: Mutex<HashMap<String, Vec<String>>>,
    unavailable: Mutex<bool>,
    lookups: AtomicUsize,
    schemas: Mutex<Vec<Option<String>>>,
}

impl StaticSchemaProvider {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table definition
    pub fn with_table(self, table: TableMetadata) -> Self {
        self.add_table(table);
        self
    }

    /// Report `columns` as the primary key of `table` even when the table
    /// itself is not registered (a target that will gain the table by DDL)
    pub fn with_primary_key(self, table: &str, columns: &[&str]) -> Self {
        self.primary_keys.lock().insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Fail every lookup with a connection error
    pub fn unavailable(self) -> Self {
        *self.unavailable.lock() = true;
        self
    }

    /// Register a table after construction
    pub fn add_table(&self, table: TableMetadata) {
        self.tables.lock().insert(table.name.clone(), table);
    }

    /// Number of catalog calls served
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Schema argument of every catalog call, in call order
    pub fn requested_schemas(&self) -> Vec<Option<String>> {
        self.schemas.lock().clone()
    }

    fn check_available(&self, schema: Option<&str>) -> streamshift_rdbc::Result<()> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.schemas.lock().push(schema.map(str::to_string));
        if *self.unavailable.lock() {
            return Err(Error::connection("catalog unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaProvider for StaticSchemaProvider {
    async fn get_table(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> streamshift_rdbc::Result<Option<TableMetadata>> {
        self.check_available(schema)?;
        Ok(self.tables.lock().get(table).cloned())
    }

    async fn table_exists(&self, schema: Option<&str>, table: &str) -> streamshift_rdbc::Result<bool> {
        self.check_available(schema)?;
        Ok(self.tables.lock().contains_key(table))
    }

    async fn get_primary_key(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> streamshift_rdbc::Result<Vec<String>> {
        self.check_available(schema)?;
        if let Some(pk) = self.primary_keys.lock().get(table) {
            return Ok(pk.clone());
        }
        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|t| {
                t.primary_key_columns()
                    .into_iter()
                    .map(|c| c.name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================================
// Memory table sink
// ============================================================================

/// A mutation seen by [`MemoryTableSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Insert {
        table: String,
        row: Row,
    },
    Update {
        table: String,
        row: Row,
        key: Row,
    },
    Delete {
        table: String,
        key: Row,
    },
    Upsert {
        table: String,
        row: Row,
        conflict: Vec<String>,
    },
}

/// In-memory tables: plain inserts always append, upserts converge on the
/// conflict columns
#[derive(Debug, Default)]
pub struct MemoryTableSink {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    calls: Mutex<Vec<SinkCall>>,
    failures: Mutex<VecDeque<ReplicationError>>,
}

fn matches_key(row: &Row, key: &Row) -> bool {
    key.iter().all(|(column, value)| row.get_by_name(column) == Some(value))
}

fn overwrite(target: &mut Row, source: &Row) {
    for (column, value) in source.iter() {
        target.push(column, value.clone());
    }
}

impl MemoryTableSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next mutation with `error` (the call is still recorded)
    pub fn fail_next(&self, error: ReplicationError) {
        self.failures.lock().push_back(error);
    }

    /// Current rows of `table`
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Every mutation call, in order
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: SinkCall) -> Result<()> {
        self.calls.lock().push(call);
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TableSink for MemoryTableSink {
    async fn insert(&self, table: &str, row: &Row) -> Result<u64> {
        self.record(SinkCall::Insert {
            table: table.to_string(),
            row: row.clone(),
        })?;
        if row.is_empty() {
            return Ok(0);
        }
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(1)
    }

    async fn update(&self, table: &str, new_row: &Row, where_row: &Row) -> Result<u64> {
        if where_row.is_empty() {
            return Err(ReplicationError::MissingPredicate {
                operation: "UPDATE",
                table: table.to_string(),
            });
        }
        self.record(SinkCall::Update {
            table: table.to_string(),
            row: new_row.clone(),
            key: where_row.clone(),
        })?;

        let mut tables = self.tables.lock();
        let mut affected = 0;
        for row in tables.entry(table.to_string()).or_default().iter_mut() {
            if matches_key(row, where_row) {
                overwrite(row, new_row);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, table: &str, where_row: &Row) -> Result<u64> {
        if where_row.is_empty() {
            return Err(ReplicationError::MissingPredicate {
                operation: "DELETE",
                table: table.to_string(),
            });
        }
        self.record(SinkCall::Delete {
            table: table.to_string(),
            key: where_row.clone(),
        })?;

        let mut tables = self.tables.lock();
        let rows = tables.entry(table.to_string()).or_default();
        let before = rows.len();
        rows.retain(|row| !matches_key(row, where_row));
        Ok((before - rows.len()) as u64)
    }

    async fn upsert(&self, table: &str, row: &Row, conflict_columns: &[String]) -> Result<u64> {
        self.record(SinkCall::Upsert {
            table: table.to_string(),
            row: row.clone(),
            conflict: conflict_columns.to_vec(),
        })?;
        if row.is_empty() {
            return Ok(0);
        }

        let key: Row = conflict_columns
            .iter()
            .filter_map(|c| row.get_by_name(c).map(|v| (c.clone(), v.clone())))
            .collect();

        let mut tables = self.tables.lock();
        let rows = tables.entry(table.to_string()).or_default();
        let existing = if key.is_empty() {
            None
        } else {
            rows.iter_mut().find(|existing| matches_key(existing, &key))
        };
        match existing {
            Some(existing) => overwrite(existing, row),
            None => rows.push(row.clone()),
        }
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_upsert_converges() {
        let sink = MemoryTableSink::new();
        let key = vec!["id".to_string()];

        sink.upsert("users", &Row::empty().with("id", 1).with("name", "a"), &key)
            .await
            .unwrap();
        sink.upsert("users", &Row::empty().with("id", 1).with("name", "b"), &key)
            .await
            .unwrap();

        let rows = sink.rows("users");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("b")));
    }

    #[tokio::test]
    async fn test_recording_connection_scripts() {
        let conn = RecordingConnection::new();
        conn.push_affected(0);
        conn.fail_next(Error::timeout("slow"));

        assert!(conn.execute("SELECT 1", &[]).await.is_err());
        assert_eq!(conn.execute("SELECT 2", &[]).await.unwrap(), 0);
        assert_eq!(conn.execute("SELECT 3", &[]).await.unwrap(), 1);
        assert_eq!(conn.executed().len(), 3);
    }
}
