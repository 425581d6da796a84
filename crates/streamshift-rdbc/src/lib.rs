//! # streamshift-rdbc
//!
//! Relational database connectivity for the StreamShift change-data applier.
//!
//! This crate provides the store-facing half of replication: a value model for
//! replicated rows, a connection abstraction, SQL generation for the target
//! dialect and catalog introspection used to clone table definitions.
//!
//! ## Features
//!
//! - **Value model**: scalars, temporal types, UUID and nested JSON
//! - **SQL dialect**: identifier quoting, source-to-target type mapping,
//!   `CREATE TABLE IF NOT EXISTS`, INSERT/UPDATE/DELETE and `ON CONFLICT` upserts
//! - **Schema discovery**: columns, nullability, length, precision and primary keys
//!   from `information_schema`
//! - **PostgreSQL backend**: `tokio-postgres` with type-directed parameter encoding
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use streamshift_rdbc::prelude::*;
//!
//! let conn: Arc<dyn Connection> =
//!     Arc::from(connect(&ConnectionConfig::new("postgres://postgres@localhost/target_db")).await?);
//! let dialect = PostgresDialect;
//!
//! let sql = dialect.upsert_sql(Some("public"), "users", &["id", "username"], &["id"]);
//! conn.execute(&sql, &[Value::Int32(1), Value::from("testuser")]).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` (default) - PostgreSQL support via tokio-postgres

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod dialect;
pub mod error;
pub mod schema;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorCategory, Result};

    pub use crate::types::{ColumnMetadata, Row, TableMetadata, Value};

    pub use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};

    pub use crate::dialect::{ColumnDefinition, PostgresDialect, SqlDialect};

    pub use crate::schema::{InformationSchemaProvider, SchemaProvider};

    #[cfg(feature = "postgres")]
    pub use crate::postgres::{connect, PgConnection, PgConnectionFactory};
}

pub use error::{Error, Result};
pub use types::{Row, Value};

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _config = ConnectionConfig::new("postgres://localhost/target_db");
        let _column = ColumnDefinition::new("id", "INTEGER");
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_value_types() {
        let v = Value::from(42_i32);
        assert!(!v.is_null());
        assert_eq!(v.as_i64(), Some(42));

        let v = Value::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
    }
}
