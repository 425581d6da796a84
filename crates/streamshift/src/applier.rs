//! Mutation applier
//!
//! Turns a table name plus row data into one parameterized statement and
//! executes it as its own auto-committed unit. Every parameter passes through
//! [`coerce_value`](crate::coercion::coerce_value) first.
//!
//! - `insert`, `update` and `upsert` with an empty row log a warning and do nothing
//! - `update` and `delete` refuse to run without a WHERE predicate
//! - zero affected rows on `update` or `delete` is logged, not an error

use async_trait::async_trait;
use std::sync::Arc;
use streamshift_rdbc::connection::Connection;
use streamshift_rdbc::dialect::SqlDialect;
use streamshift_rdbc::{Row, Value};
use tracing::{debug, warn};

use crate::coercion::coerce_row;
use crate::error::{ReplicationError, Result};

/// Destination for row mutations
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Insert `row`; returns rows affected
    async fn insert(&self, table: &str, row: &Row) -> Result<u64>;

    /// Overwrite the columns of `new_row` in rows matching `where_row`
    async fn update(&self, table: &str, new_row: &Row, where_row: &Row) -> Result<u64>;

    /// Delete rows matching `where_row`
    async fn delete(&self, table: &str, where_row: &Row) -> Result<u64>;

    /// Insert `row`, or overwrite every non-conflict column of the row
    /// already holding the same `conflict_columns` values
    async fn upsert(&self, table: &str, row: &Row, conflict_columns: &[String]) -> Result<u64>;
}

/// [`TableSink`] issuing SQL over a target connection
pub struct SqlTableSink {
    conn: Arc<dyn Connection>,
    dialect: Arc<dyn SqlDialect>,
    schema: Option<String>,
}

impl SqlTableSink {
    /// Create a sink over the target connection
    pub fn new(conn: Arc<dyn Connection>, dialect: Arc<dyn SqlDialect>) -> Self {
        Self {
            conn,
            dialect,
            schema: None,
        }
    }

    /// Qualify every statement with `schema` (connection default when unset).
    ///
    /// Must match the catalog's target schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    async fn execute(
        &self,
        operation: &'static str,
        table: &str,
        sql: &str,
        params: &[Value],
    ) -> Result<u64> {
        debug!(table = %table, operation, sql = %sql, params = params.len(), "Executing mutation");
        self.conn
            .execute(sql, params)
            .await
            .map_err(|source| ReplicationError::MutationExecution {
                operation,
                table: table.to_string(),
                source,
            })
    }
}

fn column_names(row: &Row) -> Vec<&str> {
    row.columns().iter().map(String::as_str).collect()
}

#[async_trait]
impl TableSink for SqlTableSink {
    async fn insert(&self, table: &str, row: &Row) -> Result<u64> {
        if row.is_empty() {
            warn!(table = %table, "Skipping INSERT of empty row");
            return Ok(0);
        }

        let sql = self.dialect.insert_sql(self.schema.as_deref(), table, &column_names(row));
        self.execute("INSERT", table, &sql, &coerce_row(row)).await
    }

    async fn update(&self, table: &str, new_row: &Row, where_row: &Row) -> Result<u64> {
        if new_row.is_empty() {
            warn!(table = %table, "Skipping UPDATE with empty row");
            return Ok(0);
        }
        if where_row.is_empty() {
            return Err(ReplicationError::MissingPredicate {
                operation: "UPDATE",
                table: table.to_string(),
            });
        }

        let sql = self
            .dialect
            .update_sql(
                self.schema.as_deref(),
                table,
                &column_names(new_row),
                &column_names(where_row),
            );
        let mut params = coerce_row(new_row);
        params.extend(coerce_row(where_row));

        let affected = self.execute("UPDATE", table, &sql, &params).await?;
        if affected == 0 {
            warn!(table = %table, "UPDATE matched no rows");
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

        let sql = self.dialect.delete_sql(self.schema.as_deref(), table, &column_names(where_row));
        let affected = self
            .execute("DELETE", table, &sql, &coerce_row(where_row))
            .await?;
        if affected == 0 {
            warn!(table = %table, "DELETE matched no rows");
        }
        Ok(affected)
    }

    async fn upsert(&self, table: &str, row: &Row, conflict_columns: &[String]) -> Result<u64> {
        if row.is_empty() {
            warn!(table = %table, "Skipping UPSERT of empty row");
            return Ok(0);
        }

        let conflict: Vec<&str> = conflict_columns.iter().map(String::as_str).collect();
        let sql = self.dialect.upsert_sql(
            self.schema.as_deref(),
            table,
            &column_names(row),
            &conflict,
        );
        self.execute("UPSERT", table, &sql, &coerce_row(row)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingConnection;
    use streamshift_rdbc::dialect::PostgresDialect;

    fn sink(conn: &Arc<RecordingConnection>) -> SqlTableSink {
        SqlTableSink::new(conn.clone(), Arc::new(PostgresDialect))
    }

    #[tokio::test]
    async fn test_insert_statement_and_params() {
        let conn = Arc::new(RecordingConnection::new());
        let row = Row::empty().with("id", 1).with("username", "testuser");

        sink(&conn).insert("users", &row).await.unwrap();

        let calls = conn.executed();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].sql,
            r#"INSERT INTO "users" ("id", "username") VALUES (?, ?)"#
        );
        assert_eq!(calls[0].params, vec![Value::Int32(1), Value::from("testuser")]);
    }

    #[tokio::test]
    async fn test_update_params_are_set_then_where() {
        let conn = Arc::new(RecordingConnection::new());
        let new_row = Row::empty().with("id", 5).with("name", "bolt");
        let key = Row::empty().with("id", 5);

        sink(&conn).update("parts", &new_row, &key).await.unwrap();

        let calls = conn.executed();
        assert_eq!(
            calls[0].sql,
            r#"UPDATE "parts" SET "id" = ?, "name" = ? WHERE "id" = ?"#
        );
        assert_eq!(
            calls[0].params,
            vec![Value::Int32(5), Value::from("bolt"), Value::Int32(5)]
        );
    }

    #[tokio::test]
    async fn test_missing_predicate_is_rejected() {
        let conn = Arc::new(RecordingConnection::new());
        let sink = sink(&conn);
        let row = Row::empty().with("name", "x");

        let err = sink.update("t", &row, &Row::empty()).await.unwrap_err();
        assert!(matches!(
            err,
            ReplicationError::MissingPredicate { operation: "UPDATE", .. }
        ));
        let err = sink.delete("t", &Row::empty()).await.unwrap_err();
        assert!(matches!(
            err,
            ReplicationError::MissingPredicate { operation: "DELETE", .. }
        ));
        assert!(conn.executed().is_empty());
    }

    #[tokio::test]
    async fn test_empty_rows_are_skipped() {
        let conn = Arc::new(RecordingConnection::new());
        let sink = sink(&conn);

        assert_eq!(sink.insert("t", &Row::empty()).await.unwrap(), 0);
        assert_eq!(
            sink.upsert("t", &Row::empty(), &["id".to_string()])
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            sink.update("t", &Row::empty(), &Row::empty().with("id", 1))
                .await
                .unwrap(),
            0
        );
        assert!(conn.executed().is_empty());
    }

    #[tokio::test]
    async fn test_values_are_coerced() {
        let conn = Arc::new(RecordingConnection::new());
        let row = Row::empty()
            .with("id", 1)
            .with("created_at", Value::Int64(1_700_000_000_000));

        sink(&conn)
            .upsert("events", &row, &["id".to_string()])
            .await
            .unwrap();

        let params = &conn.executed()[0].params;
        assert_eq!(params[0], Value::Int32(1));
        assert!(matches!(params[1], Value::DateTime(_)));
    }

    #[tokio::test]
    async fn test_statements_use_configured_schema() {
        let conn = Arc::new(RecordingConnection::new());
        let sink = sink(&conn).with_schema("replica");
        let row = Row::empty().with("id", 1).with("name", "a");
        let key = Row::empty().with("id", 1);

        sink.upsert("users", &row, &["id".to_string()]).await.unwrap();
        sink.update("users", &row, &key).await.unwrap();
        sink.delete("users", &key).await.unwrap();
        sink.insert("users", &row).await.unwrap();

        let calls = conn.executed();
        assert_eq!(calls.len(), 4);
        for call in &calls {
            assert!(call.sql.contains(r#""replica"."users""#), "{}", call.sql);
        }
    }

    #[tokio::test]
    async fn test_non_ascii_digit_text_is_bound_unchanged() {
        let conn = Arc::new(RecordingConnection::new());
        let row = Row::empty()
            .with("id", 1)
            .with("note", "2024-01-02T03:04:0\u{0665}");

        sink(&conn).insert("notes", &row).await.unwrap();

        assert_eq!(
            conn.executed()[0].params[1],
            Value::from("2024-01-02T03:04:0\u{0665}")
        );
    }

    #[tokio::test]
    async fn test_execution_failure_is_surfaced() {
        let conn = Arc::new(RecordingConnection::new());
        conn.fail_next(streamshift_rdbc::Error::query("relation \"t\" does not exist"));

        let err = sink(&conn)
            .insert("t", &Row::empty().with("a", 1))
            .await
            .unwrap_err();
        match err {
            ReplicationError::MutationExecution { operation, table, .. } => {
                assert_eq!(operation, "INSERT");
                assert_eq!(table, "t");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
