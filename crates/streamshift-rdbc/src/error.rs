//! Store errors
//!
//! Every failure raised while talking to a source or target database maps to
//! one [`Error`]. The applier only needs one decision from it: is the failed
//! statement worth sending again? [`Error::is_retriable`] answers that from
//! the error kind and, for server errors, the PostgreSQL SQLSTATE.

use std::fmt;
use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// SQLSTATE codes that name a transient server condition
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "53300", // too_many_connections
];

/// Coarse error kind, used for logging and the retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Could not reach the server, or the session dropped
    Connection,
    /// The server rejected a DDL, DML or catalog statement
    Statement,
    /// Key, uniqueness, foreign-key or check violation (SQLSTATE class 23)
    Constraint,
    /// A parameter could not be encoded for its column type
    Encoding,
    /// Connect or statement deadline passed
    Timeout,
    /// Bad connection URL or settings
    Configuration,
}

impl ErrorCategory {
    /// Whether a statement failing this way may succeed unchanged later
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connection => "connection",
            Self::Statement => "statement",
            Self::Constraint => "constraint",
            Self::Encoding => "encoding",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

/// Store error
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connect failed or the session was closed underneath a statement
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A statement was rejected; `sql` is the text that was sent
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        sqlstate: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Row violates a constraint on the target table
    #[error("constraint violation: {constraint_name} - {message}")]
    Constraint {
        constraint_name: String,
        message: String,
    },

    /// Value could not be bound as the column's type
    #[error("cannot encode parameter: {message}")]
    Encoding { message: String },

    #[error("timeout: {message}")]
    Timeout { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl Error {
    /// Coarse kind of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Statement,
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::Encoding { .. } => ErrorCategory::Encoding,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Whether the failed statement may succeed if sent again.
    ///
    /// Rejected statements are permanent unless the server reported a
    /// transient SQLSTATE such as a deadlock or serialization failure.
    pub fn is_retriable(&self) -> bool {
        match self.sqlstate() {
            Some(code) if TRANSIENT_SQLSTATES.contains(&code) => true,
            _ => self.category().is_retriable(),
        }
    }

    /// The statement text attached to a query error
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// Server SQLSTATE of a rejected statement
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Query { sqlstate, .. } => sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping its cause
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            sqlstate: None,
            source: None,
        }
    }

    /// Rejected statement, keeping the SQL for the log line
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            sqlstate: None,
            source: None,
        }
    }

    /// Attach the server SQLSTATE to a query error; other kinds are unchanged
    pub fn with_sqlstate(mut self, code: impl Into<String>) -> Self {
        if let Self::Query { sqlstate, .. } = &mut self {
            *sqlstate = Some(code.into());
        }
        self
    }

    /// Create a constraint violation
    pub fn constraint(constraint_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            constraint_name: constraint_name.into(),
            message: message.into(),
        }
    }

    /// Create a parameter encoding error
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
