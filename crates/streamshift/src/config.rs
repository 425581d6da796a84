//! Configuration for the streamshift replicator
//!
//! Loaded from YAML. `${VAR}` and `${VAR:-default}` references are expanded
//! from the environment before parsing; an unset variable without a default
//! expands to an empty string.
//!
//! ```yaml
//! source:
//!   url: postgres://replicator@source-db:5432/source_db
//!   password: ${SOURCE_PASSWORD}
//! target:
//!   url: postgres://replicator@replica-db:5432/target_db
//!   password: ${TARGET_PASSWORD}
//! subscription:
//!   topic_pattern: 'dbserver1\.inventory\..*'
//! delivery:
//!   policy: dead_letter
//!   dead_letter_path: /var/lib/streamshift/dlq.jsonl
//! workers: 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use streamshift_rdbc::connection::ConnectionConfig;
use validator::Validate;

use crate::delivery::{DeliveryPolicy, JsonFileDeadLetter};
use crate::retry::RetryConfig;
use crate::types::SensitiveString;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ReplicatorConfig {
    /// Source store, read for table definitions only
    #[serde(default = "StoreConfig::default_source")]
    #[validate(nested)]
    pub source: StoreConfig,

    /// Target store receiving DDL and mutations
    #[serde(default = "StoreConfig::default_target")]
    #[validate(nested)]
    pub target: StoreConfig,

    /// Which topics to consume
    #[serde(default)]
    #[validate(nested)]
    pub subscription: SubscriptionConfig,

    /// Failure handling
    #[serde(default)]
    #[validate(nested)]
    pub delivery: DeliveryConfig,

    /// Metadata cache behaviour
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Number of table-sharded workers
    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 256))]
    pub workers: usize,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            source: StoreConfig::default_source(),
            target: StoreConfig::default_target(),
            subscription: SubscriptionConfig::default(),
            delivery: DeliveryConfig::default(),
            catalog: CatalogConfig::default(),
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

/// Connection settings for one store
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StoreConfig {
    /// Connection URL
    #[serde(default)]
    pub url: String,

    /// Password, kept out of the URL and out of logs
    #[serde(default)]
    pub password: Option<SensitiveString>,

    /// Schema holding replicated tables
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub connect_timeout_secs: u64,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl StoreConfig {
    fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            password: None,
            schema: default_schema(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    fn default_source() -> Self {
        Self::with_url("postgres://postgres@localhost:5432/source_db")
    }

    fn default_target() -> Self {
        Self::with_url("postgres://postgres@localhost:5432/target_db")
    }

    /// Build the connection settings for this store
    pub fn connection_config(&self) -> ConnectionConfig {
        let config = ConnectionConfig::new(&self.url)
            .with_connect_timeout(self.connect_timeout_secs.saturating_mul(1000));
        match &self.password {
            Some(password) => config.with_password(password.expose_secret()),
            None => config,
        }
    }

    fn validate_store(&self, section: &str) -> anyhow::Result<()> {
        if self.url.trim().is_empty() {
            anyhow::bail!("'{}.url' must not be empty", section);
        }
        if let Err(e) = url::Url::parse(&self.url) {
            anyhow::bail!("'{}.url' is not a valid URL: {}", section, e);
        }
        if self.schema.trim().is_empty() {
            anyhow::bail!("'{}.schema' must not be empty", section);
        }
        Ok(())
    }
}

/// Topic subscription
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SubscriptionConfig {
    /// Regex matched against the whole topic name
    #[serde(default = "default_topic_pattern")]
    pub topic_pattern: String,

    /// Consumer group name
    #[serde(default = "default_group")]
    #[validate(length(min = 1))]
    pub group: String,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            topic_pattern: default_topic_pattern(),
            group: default_group(),
        }
    }
}

fn default_topic_pattern() -> String {
    r"dbserver1\.inventory\..*".to_string()
}

fn default_group() -> String {
    "streamshift-consumer-group".to_string()
}

impl SubscriptionConfig {
    /// The topic pattern, anchored at both ends
    pub fn topic_regex(&self) -> Result<regex::Regex, regex::Error> {
        regex::Regex::new(&format!("^(?:{})$", self.topic_pattern))
    }
}

/// Delivery policy selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicyKind {
    #[default]
    AckAlways,
    Retry,
    DeadLetter,
}

/// Failure handling settings
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub policy: DeliveryPolicyKind,

    /// Backoff for the retrying policies
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetrySettings,

    /// JSON-lines file receiving dead letters
    #[serde(default)]
    pub dead_letter_path: Option<PathBuf>,
}

impl DeliveryConfig {
    /// Build the runtime policy, opening the dead letter file if needed
    pub async fn build_policy(&self) -> anyhow::Result<DeliveryPolicy> {
        let retry = self.retry.to_retry_config();
        Ok(match self.policy {
            DeliveryPolicyKind::AckAlways => DeliveryPolicy::AckAlways,
            DeliveryPolicyKind::Retry => DeliveryPolicy::Retry(retry),
            DeliveryPolicyKind::DeadLetter => {
                let Some(path) = &self.dead_letter_path else {
                    anyhow::bail!("'delivery.dead_letter_path' is required for the dead_letter policy");
                };
                let sink = JsonFileDeadLetter::open(path).await?;
                DeliveryPolicy::DeadLetter {
                    retry,
                    sink: Arc::new(sink),
                }
            }
        })
    }
}

/// Retry backoff settings
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
            .with_jitter(self.jitter)
    }
}

/// Metadata cache settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Resolve tables by name alone when the `(database, table)` pair is not
    /// cached. Identically named tables in different databases then collide.
    #[serde(default)]
    pub lenient_table_lookup: bool,
}

impl ReplicatorConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML configuration
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = Self::expand_env_vars(content);

        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.source.validate_store("source")?;
        self.target.validate_store("target")?;

        Validate::validate(self)
            .map_err(|e| anyhow::anyhow!("Config validation failed: {}", e))?;

        if let Err(e) = self.subscription.topic_regex() {
            anyhow::bail!("'subscription.topic_pattern' is not a valid regex: {}", e);
        }

        let retry = &self.delivery.retry;
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            anyhow::bail!("'delivery.retry.initial_backoff_ms' must not exceed 'max_backoff_ms'");
        }
        if self.delivery.policy == DeliveryPolicyKind::DeadLetter
            && self.delivery.dead_letter_path.is_none()
        {
            anyhow::bail!("'delivery.dead_letter_path' is required for the dead_letter policy");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("STREAMSHIFT_TEST_HOST", "replica-db");
        let expanded = ReplicatorConfig::expand_env_vars("url: postgres://${STREAMSHIFT_TEST_HOST}/t");
        assert_eq!(expanded, "url: postgres://replica-db/t");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("STREAMSHIFT_MISSING_VAR");
        let expanded = ReplicatorConfig::expand_env_vars("value: ${STREAMSHIFT_MISSING_VAR:-fallback}");
        assert_eq!(expanded, "value: fallback");
    }

    #[test]
    fn test_unset_env_var_expands_to_empty() {
        std::env::remove_var("STREAMSHIFT_UNSET_URL");
        let err = ReplicatorConfig::from_yaml("target:\n  url: \"${STREAMSHIFT_UNSET_URL}\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("target.url"), "{err}");
    }

    #[test]
    fn test_defaults() {
        let config = ReplicatorConfig::from_yaml("{}").unwrap();
        assert_eq!(config.source.url, "postgres://postgres@localhost:5432/source_db");
        assert_eq!(config.target.url, "postgres://postgres@localhost:5432/target_db");
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.subscription.group, "streamshift-consumer-group");
        assert_eq!(config.delivery.policy, DeliveryPolicyKind::AckAlways);
        assert!(!config.catalog.lenient_table_lookup);
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_topic_regex_is_anchored() {
        let regex = SubscriptionConfig::default().topic_regex().unwrap();
        assert!(regex.is_match("dbserver1.inventory.customers"));
        assert!(!regex.is_match("dbserver1.billing.invoices"));
        assert!(!regex.is_match("x.dbserver1.inventory.customers"));
    }

    #[test]
    fn test_validation_failures() {
        assert!(ReplicatorConfig::from_yaml("workers: 0").is_err());
        assert!(ReplicatorConfig::from_yaml("subscription:\n  topic_pattern: '('").is_err());
        assert!(ReplicatorConfig::from_yaml("source:\n  url: 'not a url'").is_err());
        assert!(ReplicatorConfig::from_yaml("delivery:\n  policy: dead_letter").is_err());
        assert!(
            ReplicatorConfig::from_yaml("delivery:\n  retry:\n    backoff_multiplier: 0.5").is_err()
        );
        assert!(ReplicatorConfig::from_yaml("delivery:\n  retry:\n    jitter: 1.5").is_err());
        assert!(ReplicatorConfig::from_yaml("subscription:\n  group: ''").is_err());
        assert!(ReplicatorConfig::from_yaml("target:\n  connect_timeout_secs: 0").is_err());
    }

    #[test]
    fn test_password_is_redacted() {
        let config = ReplicatorConfig::from_yaml(
            "source:\n  url: postgres://replicator@db/source_db\n  password: hunter2\n",
        )
        .unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
        assert_eq!(
            config.source.connection_config().password.as_deref(),
            Some("hunter2")
        );
    }
}
