//! Replication statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Counters shared by the router, the catalog and the delivery policies.
#[derive(Debug, Default)]
pub struct ReplicationStats {
    events_received: AtomicU64,
    tombstones: AtomicU64,
    decode_failures: AtomicU64,
    inserts: AtomicU64,
    upserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    dead_lettered: AtomicU64,
    tables_created: AtomicU64,
    tables_inferred: AtomicU64,
}

impl ReplicationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tombstone(&self) {
        self.tombstones.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upsert(&self) {
        self.upserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// An event that was decoded but produced no mutation
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// A target table was created; `inferred` marks the sample-data fallback
    pub fn record_table_created(&self, inferred: bool) {
        self.tables_created.fetch_add(1, Ordering::Relaxed);
        if inferred {
            self.tables_inferred.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ReplicationStatsSnapshot {
        ReplicationStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            tombstones: self.tombstones.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            tables_created: self.tables_created.load(Ordering::Relaxed),
            tables_inferred: self.tables_inferred.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReplicationStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStatsSnapshot {
    pub events_received: u64,
    pub tombstones: u64,
    pub decode_failures: u64,
    pub inserts: u64,
    pub upserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub skipped: u64,
    pub failures: u64,
    pub retries: u64,
    pub dead_lettered: u64,
    pub tables_created: u64,
    pub tables_inferred: u64,
}

impl ReplicationStatsSnapshot {
    /// Total mutations issued against the target
    pub fn mutations(&self) -> u64 {
        self.inserts + self.upserts + self.updates + self.deletes
    }

    /// Emit the snapshot as one structured log line
    pub fn log(&self) {
        info!(
            received = self.events_received,
            tombstones = self.tombstones,
            decode_failures = self.decode_failures,
            inserts = self.inserts,
            upserts = self.upserts,
            updates = self.updates,
            deletes = self.deletes,
            skipped = self.skipped,
            failures = self.failures,
            retries = self.retries,
            dead_lettered = self.dead_lettered,
            tables_created = self.tables_created,
            tables_inferred = self.tables_inferred,
            "Replication statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = ReplicationStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_upsert();
        stats.record_delete();
        stats.record_table_created(true);
        stats.record_table_created(false);

        let snap = stats.snapshot();
        assert_eq!(snap.events_received, 2);
        assert_eq!(snap.mutations(), 2);
        assert_eq!(snap.tables_created, 2);
        assert_eq!(snap.tables_inferred, 1);
        assert_eq!(snap.failures, 0);
    }
}
