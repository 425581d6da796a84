//! Message transport
//!
//! The broker is an external collaborator; the runner only needs something
//! that hands out messages and accepts an acknowledgement once processing of
//! a message has finished.
//!
//! - [`ChannelTransport`]: in-process, fed through a tokio mpsc sender
//! - [`JsonLinesTransport`]: one envelope per line from a file or stdin;
//!   a blank line is a tombstone

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{ReplicationError, Result};

/// One message as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic (one per source table)
    pub topic: String,
    /// Message key, if any
    pub key: Option<Bytes>,
    /// Envelope body; `None` is a tombstone
    pub payload: Option<Bytes>,
    /// Position within the topic
    pub offset: u64,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, offset: u64) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: Some(payload.into()),
            offset,
        }
    }

    pub fn tombstone(topic: impl Into<String>, offset: u64) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: None,
            offset,
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Source of messages with explicit acknowledgement
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Next message; `None` once the transport is exhausted
    async fn recv(&self) -> Result<Option<InboundMessage>>;

    /// Processing of `message` has finished; advance the consumption position
    async fn acknowledge(&self, message: &InboundMessage) -> Result<()>;
}

/// Highest acknowledged offset per topic
#[derive(Debug, Default)]
struct AckLedger {
    committed: Mutex<HashMap<String, u64>>,
    count: Mutex<u64>,
}

impl AckLedger {
    fn record(&self, message: &InboundMessage) {
        let mut committed = self.committed.lock();
        let entry = committed.entry(message.topic.clone()).or_insert(message.offset);
        *entry = (*entry).max(message.offset);
        *self.count.lock() += 1;
        trace!(topic = %message.topic, offset = message.offset, "Acknowledged message");
    }

    fn committed(&self, topic: &str) -> Option<u64> {
        self.committed.lock().get(topic).copied()
    }

    fn count(&self) -> u64 {
        *self.count.lock()
    }
}

// ============================================================================
// Channel transport
// ============================================================================

/// In-process transport over a bounded tokio channel
pub struct ChannelTransport {
    receiver: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
    acks: AckLedger,
}

impl ChannelTransport {
    /// Create a transport and the sender feeding it. The transport ends when
    /// every sender is dropped.
    pub fn channel(capacity: usize) -> (mpsc::Sender<InboundMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                receiver: tokio::sync::Mutex::new(rx),
                acks: AckLedger::default(),
            },
        )
    }

    /// Highest acknowledged offset of `topic`
    pub fn committed_offset(&self, topic: &str) -> Option<u64> {
        self.acks.committed(topic)
    }

    /// Number of acknowledgements received
    pub fn acknowledged(&self) -> u64 {
        self.acks.count()
    }
}

#[async_trait]
impl MessageTransport for ChannelTransport {
    async fn recv(&self) -> Result<Option<InboundMessage>> {
        Ok(self.receiver.lock().await.recv().await)
    }

    async fn acknowledge(&self, message: &InboundMessage) -> Result<()> {
        self.acks.record(message);
        Ok(())
    }
}

// ============================================================================
// JSON lines transport
// ============================================================================

type LineReader = Lines<Box<dyn AsyncBufRead + Send + Unpin>>;

/// Reads one envelope per line.
///
/// The topic of each message is `<prefix>.<source.db>.<source.table>`, taken
/// from the envelope itself; lines without a readable source (including
/// tombstones) use the topic of the previous line, or the bare prefix.
pub struct JsonLinesTransport {
    lines: tokio::sync::Mutex<(LineReader, u64, String)>,
    prefix: String,
    acks: AckLedger,
}

impl JsonLinesTransport {
    /// Read from any buffered reader
    pub fn new(reader: impl AsyncBufRead + Send + Unpin + 'static, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let reader: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: tokio::sync::Mutex::new((reader.lines(), 0, prefix.clone())),
            prefix,
            acks: AckLedger::default(),
        }
    }

    /// Read from a file
    pub async fn open(path: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await.map_err(|e| {
            ReplicationError::transport(format!(
                "cannot open {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self::new(BufReader::new(file), prefix))
    }

    /// Read from standard input
    pub fn stdin(prefix: impl Into<String>) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), prefix)
    }

    /// Number of acknowledgements received
    pub fn acknowledged(&self) -> u64 {
        self.acks.count()
    }

    fn topic_for(&self, line: &str) -> Option<String> {
        let value: JsonValue = serde_json::from_str(line).ok()?;
        let source = value
            .get("source")
            .or_else(|| value.get("payload").and_then(|p| p.get("source")))?;
        let db = source.get("db")?.as_str()?;
        let table = source.get("table")?.as_str()?;
        Some(format!("{}.{}.{}", self.prefix, db, table))
    }
}

#[async_trait]
impl MessageTransport for JsonLinesTransport {
    async fn recv(&self) -> Result<Option<InboundMessage>> {
        let mut guard = self.lines.lock().await;
        let (lines, next_offset, last_topic) = &mut *guard;

        let Some(line) = lines.next_line().await? else {
            return Ok(None);
        };

        let offset = *next_offset;
        *next_offset += 1;

        if line.trim().is_empty() {
            return Ok(Some(InboundMessage::tombstone(last_topic.clone(), offset)));
        }

        if let Some(topic) = self.topic_for(&line) {
            *last_topic = topic;
        }
        Ok(Some(InboundMessage::new(last_topic.clone(), line, offset)))
    }

    async fn acknowledge(&self, message: &InboundMessage) -> Result<()> {
        self.acks.record(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport() {
        let (tx, transport) = ChannelTransport::channel(4);
        tx.send(InboundMessage::new("t", "{}", 7)).await.unwrap();
        drop(tx);

        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg.offset, 7);
        transport.acknowledge(&msg).await.unwrap();
        assert!(transport.recv().await.unwrap().is_none());

        assert_eq!(transport.committed_offset("t"), Some(7));
        assert_eq!(transport.acknowledged(), 1);
    }

    #[tokio::test]
    async fn test_json_lines_topics_and_tombstones() {
        let input = concat!(
            r#"{"op":"c","after":{"id":1},"source":{"db":"inventory","table":"users"}}"#,
            "\n",
            "\n",
            "not json\n",
        );
        let transport = JsonLinesTransport::new(input.as_bytes(), "dbserver1");

        let first = transport.recv().await.unwrap().unwrap();
        assert_eq!(first.topic, "dbserver1.inventory.users");
        assert_eq!(first.offset, 0);
        assert!(first.payload.is_some());

        let tombstone = transport.recv().await.unwrap().unwrap();
        assert_eq!(tombstone.topic, "dbserver1.inventory.users");
        assert!(tombstone.payload.is_none());

        let garbage = transport.recv().await.unwrap().unwrap();
        assert_eq!(garbage.offset, 2);
        assert_eq!(garbage.payload.as_deref(), Some(&b"not json"[..]));

        assert!(transport.recv().await.unwrap().is_none());
    }
}
