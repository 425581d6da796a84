//! Error types for streamshift

use thiserror::Error;

/// Result type for replication operations
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors raised while applying change events
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ReplicationError {
    /// Malformed envelope; the event is dropped
    #[error("failed to decode change event: {0}")]
    Decode(String),

    /// Update or delete without a resolvable primary key
    #[error("no primary key values resolved for table {table}")]
    UnresolvedKey { table: String },

    /// Source catalog unreachable or table unknown there
    #[error("schema introspection failed for {table}: {message}")]
    SchemaIntrospection { table: String, message: String },

    /// No row image available to infer a table definition from
    #[error("cannot infer schema for {table}: event carries neither an after nor a before image")]
    NoSample { table: String },

    /// `CREATE TABLE` failed on the target
    #[error("DDL failed for table {table}: {source}")]
    DdlExecution {
        table: String,
        #[source]
        source: streamshift_rdbc::Error,
    },

    /// INSERT/UPDATE/DELETE/UPSERT failed on the target
    #[error("{operation} failed for table {table}: {source}")]
    MutationExecution {
        operation: &'static str,
        table: String,
        #[source]
        source: streamshift_rdbc::Error,
    },

    /// UPDATE or DELETE requested without a WHERE predicate
    #[error("refusing {operation} on table {table} without a WHERE predicate")]
    MissingPredicate {
        operation: &'static str,
        table: String,
    },

    /// Catalog or connectivity failure against a store
    #[error("store error: {0}")]
    Store(#[from] streamshift_rdbc::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Message transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Dead letter destination failure
    #[error("dead letter error: {0}")]
    DeadLetter(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplicationError {
    /// Check if re-attempting the same event may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DdlExecution { source, .. }
            | Self::MutationExecution { source, .. }
            | Self::Store(source) => source.is_retriable(),
            _ => false,
        }
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReplicationError::MissingPredicate {
            operation: "DELETE",
            table: "products".into(),
        };
        assert_eq!(
            err.to_string(),
            "refusing DELETE on table products without a WHERE predicate"
        );
    }

    #[test]
    fn test_retryable_check() {
        let transient = ReplicationError::MutationExecution {
            operation: "UPSERT",
            table: "users".into(),
            source: streamshift_rdbc::Error::connection("reset by peer"),
        };
        assert!(transient.is_retryable());

        let permanent = ReplicationError::MutationExecution {
            operation: "INSERT",
            table: "users".into(),
            source: streamshift_rdbc::Error::query("column \"nope\" does not exist"),
        };
        assert!(!permanent.is_retryable());

        assert!(!ReplicationError::decode("bad json").is_retryable());
        assert!(ReplicationError::Store(streamshift_rdbc::Error::timeout("5s")).is_retryable());
    }
}
