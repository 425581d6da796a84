//! Delivery policies
//!
//! Decide what happens to a message whose processing failed. Every policy
//! ends with the message acknowledged; they differ in how hard they try first:
//!
//! - [`DeliveryPolicy::AckAlways`]: one attempt, failures are logged and dropped
//! - [`DeliveryPolicy::Retry`]: transient failures are re-attempted with backoff
//! - [`DeliveryPolicy::DeadLetter`]: as `Retry`, then the message is written to
//!   a [`DeadLetterSink`]
//!
//! Tombstones never fail and malformed envelopes are never retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

use crate::error::{ReplicationError, Result};
use crate::retry::{retry, RetryConfig};
use crate::router::{EventRouter, RouteOutcome};
use crate::transport::InboundMessage;

/// A message that could not be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Topic the message came from
    pub topic: String,
    /// Offset within the topic
    pub offset: u64,
    /// Message key as UTF-8 (lossy)
    pub key: Option<String>,
    /// Envelope body as UTF-8 (lossy)
    pub payload: Option<String>,
    /// Final error text
    pub error: String,
    /// Attempts made before giving up
    pub attempts: u32,
    /// When the message was dead-lettered
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(message: &InboundMessage, error: &ReplicationError, attempts: u32) -> Self {
        Self {
            topic: message.topic.clone(),
            offset: message.offset,
            key: message
                .key
                .as_ref()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message
                .payload
                .as_ref()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            error: error.to_string(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

/// Destination for dead letters
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn write(&self, record: DeadLetterRecord) -> Result<()>;
}

/// Appends dead letters to a JSON-lines file
pub struct JsonFileDeadLetter {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonFileDeadLetter {
    /// Open `path` for appending, creating it if needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                ReplicationError::DeadLetter(format!("cannot open {}: {}", path.display(), e))
            })?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for JsonFileDeadLetter {
    async fn write(&self, record: DeadLetterRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record)
            .map_err(|e| ReplicationError::DeadLetter(e.to_string()))?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps dead letters in memory
#[derive(Debug, Default)]
pub struct MemoryDeadLetter {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl MemoryDeadLetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetter {
    async fn write(&self, record: DeadLetterRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// What became of a message
#[derive(Debug)]
pub enum Disposition {
    /// Routed without error
    Processed(RouteOutcome),
    /// Failed and dropped
    Dropped(ReplicationError),
    /// Failed and written to the dead letter sink
    DeadLettered(ReplicationError),
}

impl Disposition {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Processed(_))
    }
}

/// Failure handling applied around each message
#[derive(Clone, Default)]
pub enum DeliveryPolicy {
    /// Single attempt; failures are logged, the message is acknowledged
    #[default]
    AckAlways,
    /// Re-attempt retryable failures, then acknowledge
    Retry(RetryConfig),
    /// Re-attempt retryable failures, then dead-letter and acknowledge
    DeadLetter {
        retry: RetryConfig,
        sink: Arc<dyn DeadLetterSink>,
    },
}

impl fmt::Debug for DeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AckAlways => f.write_str("AckAlways"),
            Self::Retry(config) => f.debug_tuple("Retry").field(config).finish(),
            Self::DeadLetter { retry, .. } => f
                .debug_struct("DeadLetter")
                .field("retry", retry)
                .finish_non_exhaustive(),
        }
    }
}

impl DeliveryPolicy {
    /// Policy name as used in configuration
    pub fn name(&self) -> &'static str {
        match self {
            Self::AckAlways => "ack_always",
            Self::Retry(_) => "retry",
            Self::DeadLetter { .. } => "dead_letter",
        }
    }

    fn retry_config(&self) -> Option<&RetryConfig> {
        match self {
            Self::AckAlways => None,
            Self::Retry(config) | Self::DeadLetter { retry: config, .. } => Some(config),
        }
    }

    /// Route `message` under this policy. The caller acknowledges afterwards
    /// whatever the disposition.
    pub async fn process(&self, router: &EventRouter, message: &InboundMessage) -> Disposition {
        let stats = router.stats();
        stats.record_received();

        let payload = message.payload.as_deref();
        let (result, attempts) = match self.retry_config() {
            None => (router.route(payload).await, 1),
            Some(config) => {
                let outcome = retry(config, || router.route(payload)).await;
                for _ in 0..outcome.retries() {
                    stats.record_retry();
                }
                (outcome.result, outcome.attempts)
            }
        };

        let err = match result {
            Ok(outcome) => return Disposition::Processed(outcome),
            Err(err) => err,
        };
        stats.record_failure();

        let Self::DeadLetter { sink, .. } = self else {
            error!(
                topic = %message.topic,
                offset = message.offset,
                attempts,
                error = %err,
                "Failed to apply change event, dropping it"
            );
            return Disposition::Dropped(err);
        };

        let record = DeadLetterRecord::new(message, &err, attempts);
        match sink.write(record).await {
            Ok(()) => {
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    attempts,
                    error = %err,
                    "Failed to apply change event, written to dead letter sink"
                );
                stats.record_dead_letter();
                Disposition::DeadLettered(err)
            }
            Err(dlq_err) => {
                error!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %err,
                    dead_letter_error = %dlq_err,
                    "Failed to apply change event and to dead-letter it, dropping it"
                );
                Disposition::Dropped(err)
            }
        }
    }
}
