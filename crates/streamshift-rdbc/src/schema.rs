//! Schema discovery for streamshift-rdbc
//!
//! Provides:
//! - SchemaProvider: read-only catalog discovery
//! - InformationSchemaProvider: `information_schema` backed provider over any [`Connection`]

use async_trait::async_trait;
use std::sync::Arc;

use crate::connection::Connection;
use crate::dialect::SqlDialect;
use crate::error::Result;
use crate::types::{ColumnMetadata, Row, TableMetadata, Value};

/// Schema provider for read-only schema discovery
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Get table metadata (columns in ordinal order with key ordinals)
    async fn get_table(&self, schema: Option<&str>, table: &str) -> Result<Option<TableMetadata>>;

    /// Check if a table exists
    async fn table_exists(&self, schema: Option<&str>, table: &str) -> Result<bool> {
        Ok(self.get_table(schema, table).await?.is_some())
    }

    /// Get primary key column names for a table, in key order
    async fn get_primary_key(&self, schema: Option<&str>, table: &str) -> Result<Vec<String>> {
        let meta = self.get_table(schema, table).await?;
        Ok(meta
            .map(|t| {
                t.primary_key_columns()
                    .into_iter()
                    .map(|c| c.name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Schema provider reading the SQL-standard `information_schema` views
pub struct InformationSchemaProvider {
    conn: Arc<dyn Connection>,
    dialect: Arc<dyn SqlDialect>,
    default_schema: String,
}

impl InformationSchemaProvider {
    /// Create a new schema provider
    pub fn new(conn: Arc<dyn Connection>, dialect: Arc<dyn SqlDialect>) -> Self {
        Self {
            conn,
            dialect,
            default_schema: "public".to_string(),
        }
    }

    /// Schema used when callers pass `None`
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    fn schema_or_default<'a>(&'a self, schema: Option<&'a str>) -> &'a str {
        schema.unwrap_or(&self.default_schema)
    }
}

fn text(row: &Row, column: &str) -> Option<String> {
    row.get_by_name(column)
        .and_then(|v| v.as_str())
        .map(String::from)
}

fn unsigned(row: &Row, column: &str) -> Option<u32> {
    row.get_by_name(column)
        .and_then(|v| v.as_i64())
        .and_then(|v| u32::try_from(v).ok())
}

fn column_from_row(row: &Row) -> ColumnMetadata {
    ColumnMetadata {
        name: text(row, "column_name").unwrap_or_default(),
        type_name: text(row, "data_type").unwrap_or_default(),
        nullable: row
            .get_by_name("nullable")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        primary_key_ordinal: unsigned(row, "pk_ordinal"),
        ordinal: unsigned(row, "ordinal_position").unwrap_or(0),
        max_length: unsigned(row, "character_maximum_length"),
        precision: unsigned(row, "numeric_precision"),
        scale: unsigned(row, "numeric_scale"),
    }
}

#[async_trait]
impl SchemaProvider for InformationSchemaProvider {
    async fn get_table(&self, schema: Option<&str>, table: &str) -> Result<Option<TableMetadata>> {
        let schema = self.schema_or_default(schema);
        let params = [
            Value::from(schema),
            Value::from(table),
            Value::from(schema),
            Value::from(table),
        ];
        let rows = self
            .conn
            .query(&self.dialect.list_columns_sql(), &params)
            .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut table_meta = TableMetadata::new(table);
        table_meta.schema = Some(schema.to_string());
        table_meta.columns = rows.iter().map(column_from_row).collect();

        Ok(Some(table_meta))
    }

    async fn table_exists(&self, schema: Option<&str>, table: &str) -> Result<bool> {
        let schema = self.schema_or_default(schema);
        let row = self
            .conn
            .query_one(
                &self.dialect.table_exists_sql(),
                &[Value::from(schema), Value::from(table)],
            )
            .await?;

        Ok(row
            .and_then(|r| r.get(0).and_then(Value::as_bool))
            .unwrap_or(false))
    }

    async fn get_primary_key(&self, schema: Option<&str>, table: &str) -> Result<Vec<String>> {
        let schema = self.schema_or_default(schema);
        let rows = self
            .conn
            .query(
                &self.dialect.primary_key_sql(),
                &[Value::from(schema), Value::from(table)],
            )
            .await?;

        Ok(rows.iter().filter_map(|r| text(r, "column_name")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_from_row() {
        let row = Row::empty()
            .with("column_name", "price")
            .with("data_type", "numeric")
            .with("nullable", false)
            .with("ordinal_position", 3)
            .with("character_maximum_length", Value::Null)
            .with("numeric_precision", 10)
            .with("numeric_scale", 2)
            .with("pk_ordinal", Value::Null);

        let col = column_from_row(&row);
        assert_eq!(col.name, "price");
        assert_eq!(col.type_name, "numeric");
        assert!(!col.nullable);
        assert_eq!(col.ordinal, 3);
        assert_eq!(col.max_length, None);
        assert_eq!(col.precision, Some(10));
        assert_eq!(col.scale, Some(2));
        assert!(!col.is_primary_key());
    }
}
