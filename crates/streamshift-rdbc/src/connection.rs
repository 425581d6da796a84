//! Connection traits for streamshift-rdbc
//!
//! - Connection: query and statement execution, one auto-committed unit per call
//! - ConnectionFactory: creates connections from a [`ConnectionConfig`]

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Row, Value};

/// A connection to a database
///
/// Statements use positional `?` markers; backends translate them to their
/// native placeholder syntax.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement that modifies data or schema, returns affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query and return the first row (convenience method)
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Configuration for creating connections
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Connection URL (e.g., postgres://user@host:5432/db)
    pub url: String,
    /// Password supplied out of band (overrides any password in the URL)
    pub password: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Application name (shown in pg_stat_activity)
    pub application_name: Option<String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &redact_url(&self.url))
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            password: None,
            connect_timeout_ms: 10_000,
            application_name: Some("streamshift".into()),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration with just a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// URL with any embedded password masked, safe for logs
    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }
}

fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::new("postgres://localhost/target_db")
            .with_connect_timeout(5000)
            .with_password("hunter2")
            .with_application_name("replicator");

        assert_eq!(config.url, "postgres://localhost/target_db");
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.password.as_deref(), Some("hunter2"));
        assert_eq!(config.application_name, Some("replicator".into()));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config =
            ConnectionConfig::new("postgres://app:s3cret@db:5432/source_db").with_password("pw");
        let debug = format!("{:?}", config);

        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("\"pw\""));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_redacted_url_without_password_is_unchanged() {
        let config = ConnectionConfig::new("postgres://postgres@localhost:5432/target_db");
        assert_eq!(
            config.redacted_url(),
            "postgres://postgres@localhost:5432/target_db"
        );
    }
}
