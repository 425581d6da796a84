//! Replication runner
//!
//! Pulls messages from a [`MessageTransport`] and fans them out to a fixed set
//! of workers. Each topic always lands on the same worker, so events of one
//! table are applied in delivery order while different tables proceed
//! concurrently. Every message is acknowledged once its worker is done with
//! it, whatever the outcome.
//!
//! On shutdown (signal, or the transport running dry) the dispatcher stops
//! reading and the workers drain what is already queued.

use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::delivery::{DeliveryPolicy, Disposition};
use crate::error::Result;
use crate::router::EventRouter;
use crate::stats::ReplicationStatsSnapshot;
use crate::transport::{InboundMessage, MessageTransport};

const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Worker index for `topic`
pub fn shard_for(topic: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    topic.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

/// Drives a transport through the router under a delivery policy
pub struct ReplicationRunner {
    transport: Arc<dyn MessageTransport>,
    router: Arc<EventRouter>,
    policy: DeliveryPolicy,
    topic_filter: Option<Regex>,
    workers: usize,
    queue_depth: usize,
}

impl ReplicationRunner {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        router: Arc<EventRouter>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            transport,
            router,
            policy,
            topic_filter: None,
            workers: 1,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    /// Number of workers (at least one)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Only route topics matching `filter`; others are acknowledged and skipped
    pub fn with_topic_filter(mut self, filter: Regex) -> Self {
        self.topic_filter = Some(filter);
        self
    }

    /// Per-worker queue capacity
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Run until the transport is exhausted or a shutdown signal arrives
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<ReplicationStatsSnapshot> {
        info!(
            workers = self.workers,
            policy = self.policy.name(),
            "Starting replication"
        );

        let mut senders = Vec::with_capacity(self.workers);
        let mut handles = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let (tx, rx) = mpsc::channel(self.queue_depth);
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(
                worker,
                rx,
                self.transport.clone(),
                self.router.clone(),
                self.policy.clone(),
            )));
        }

        let dispatched = self.dispatch(&senders, &mut shutdown_rx).await;

        // closing the queues lets workers drain and exit
        drop(senders);
        for (worker, result) in futures::future::join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = result {
                error!(worker, error = %e, "Worker task failed");
            }
        }

        let snapshot = self.router.stats().snapshot();
        snapshot.log();
        dispatched.map(|()| snapshot)
    }

    async fn dispatch(
        &self,
        senders: &[mpsc::Sender<InboundMessage>],
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested, draining workers");
                    return Ok(());
                }
                received = self.transport.recv() => received?,
            };

            let Some(message) = message else {
                info!("Transport exhausted, draining workers");
                return Ok(());
            };

            if let Some(filter) = &self.topic_filter {
                if !filter.is_match(&message.topic) {
                    debug!(topic = %message.topic, offset = message.offset, "Topic not subscribed, skipping");
                    self.transport.acknowledge(&message).await?;
                    continue;
                }
            }

            let shard = shard_for(&message.topic, senders.len());
            if senders[shard].send(message).await.is_err() {
                warn!(worker = shard, "Worker queue closed, stopping dispatch");
                return Ok(());
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    mut rx: mpsc::Receiver<InboundMessage>,
    transport: Arc<dyn MessageTransport>,
    router: Arc<EventRouter>,
    policy: DeliveryPolicy,
) {
    debug!(worker, "Worker started");
    while let Some(message) = rx.recv().await {
        if let Disposition::Processed(outcome) = policy.process(&router, &message).await {
            debug!(worker, topic = %message.topic, offset = message.offset, outcome = ?outcome, "Processed message");
        }
        if let Err(e) = transport.acknowledge(&message).await {
            error!(worker, topic = %message.topic, offset = message.offset, error = %e, "Failed to acknowledge message");
        }
    }
    debug!(worker, "Worker stopped");
}
