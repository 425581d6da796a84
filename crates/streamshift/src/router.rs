//! Event router
//!
//! Decodes a raw payload, makes sure the target table exists and picks the
//! mutation for the event's operation:
//!
//! | op | row | key resolved | key missing |
//! |----|-----|--------------|-------------|
//! | `c`, `r` | `after` | upsert on the key columns | insert |
//! | `u` | `after` (old row: `before`) | update where key | warn, then as `c` |
//! | `d` | `before` | delete where key | warn, no-op |
//!
//! Tombstones and unknown operation codes are no-ops. Acknowledgement is the
//! caller's concern (see [`crate::delivery`]).

use std::fmt;
use std::sync::Arc;
use streamshift_rdbc::Row;
use tracing::{debug, warn};

use crate::applier::TableSink;
use crate::catalog::SchemaCatalog;
use crate::error::Result;
use crate::event::{is_tombstone, ChangeEvent, Operation};
use crate::stats::ReplicationStats;
use crate::types::TableId;

/// Mutation issued for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Upsert,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "INSERT",
            Self::Upsert => "UPSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// What routing an event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Empty body, nothing to do
    Tombstone,
    /// Decoded but no mutation applies (unknown op, missing image, unkeyed delete)
    Skipped,
    /// One mutation was executed
    Applied {
        mutation: MutationKind,
        rows_affected: u64,
    },
}

/// Routes change events onto a [`TableSink`]
pub struct EventRouter {
    catalog: Arc<SchemaCatalog>,
    sink: Arc<dyn TableSink>,
    stats: Arc<ReplicationStats>,
}

impl EventRouter {
    pub fn new(catalog: Arc<SchemaCatalog>, sink: Arc<dyn TableSink>) -> Self {
        Self {
            catalog,
            sink,
            stats: Arc::new(ReplicationStats::new()),
        }
    }

    pub fn with_stats(mut self, stats: Arc<ReplicationStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<ReplicationStats> {
        &self.stats
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    /// Route one raw message payload.
    ///
    /// Returns `Err` for malformed envelopes and for DDL or mutation failures;
    /// the caller decides whether that is retried, dead-lettered or dropped.
    pub async fn route(&self, payload: Option<&[u8]>) -> Result<RouteOutcome> {
        let payload = match payload {
            Some(bytes) if !is_tombstone(Some(bytes)) => bytes,
            _ => {
                debug!("Tombstone received, nothing to apply");
                self.stats.record_tombstone();
                return Ok(RouteOutcome::Tombstone);
            }
        };

        let event = ChangeEvent::from_slice(payload).inspect_err(|_| {
            self.stats.record_decode_failure();
        })?;
        self.apply(&event).await
    }

    /// Apply an already decoded event
    pub async fn apply(&self, event: &ChangeEvent) -> Result<RouteOutcome> {
        let table = event.table_id();

        let outcome = match &event.op {
            Operation::Create | Operation::Read => match &event.after {
                Some(after) => {
                    self.catalog
                        .ensure_table_exists(&table, event.sample_row())
                        .await?;
                    self.write_row(&table, after).await?
                }
                None => self.skip(&table, &event.op, "event has no after image"),
            },
            Operation::Update => match &event.after {
                Some(after) => {
                    self.catalog
                        .ensure_table_exists(&table, event.sample_row())
                        .await?;
                    let before = event.before.clone().unwrap_or_default();
                    self.update_row(&table, &before, after).await?
                }
                None => self.skip(&table, &event.op, "event has no after image"),
            },
            Operation::Delete => match &event.before {
                Some(before) => {
                    self.catalog
                        .ensure_table_exists(&table, event.sample_row())
                        .await?;
                    self.delete_row(&table, before).await?
                }
                None => self.skip(&table, &event.op, "event has no before image"),
            },
            Operation::Unknown(code) => {
                warn!(table = %table, op = %code, "Unknown operation code, ignoring event");
                self.stats.record_skipped();
                RouteOutcome::Skipped
            }
        };

        if let RouteOutcome::Applied {
            mutation,
            rows_affected,
        } = &outcome
        {
            debug!(table = %table, op = %event.op, mutation = %mutation, rows_affected, "Applied change event");
        }
        Ok(outcome)
    }

    fn skip(&self, table: &TableId, op: &Operation, reason: &str) -> RouteOutcome {
        warn!(table = %table, op = %op, reason, "Skipping change event");
        self.stats.record_skipped();
        RouteOutcome::Skipped
    }

    async fn write_row(&self, table: &TableId, row: &Row) -> Result<RouteOutcome> {
        let key = self
            .catalog
            .extract_primary_key_values(table, &Row::empty(), row);

        if key.is_empty() {
            let rows_affected = self.sink.insert(&table.table, row).await?;
            self.stats.record_insert();
            Ok(RouteOutcome::Applied {
                mutation: MutationKind::Insert,
                rows_affected,
            })
        } else {
            let conflict = key.columns().to_vec();
            let rows_affected = self.sink.upsert(&table.table, row, &conflict).await?;
            self.stats.record_upsert();
            Ok(RouteOutcome::Applied {
                mutation: MutationKind::Upsert,
                rows_affected,
            })
        }
    }

    async fn update_row(&self, table: &TableId, before: &Row, after: &Row) -> Result<RouteOutcome> {
        let key = self.catalog.extract_primary_key_values(table, before, after);
        if key.is_empty() {
            warn!(table = %table, "UPDATE without a resolvable primary key, applying as insert");
            return self.write_row(table, after).await;
        }

        let rows_affected = self.sink.update(&table.table, after, &key).await?;
        self.stats.record_update();
        Ok(RouteOutcome::Applied {
            mutation: MutationKind::Update,
            rows_affected,
        })
    }

    async fn delete_row(&self, table: &TableId, before: &Row) -> Result<RouteOutcome> {
        let key = self
            .catalog
            .extract_primary_key_values(table, before, &Row::empty());
        if key.is_empty() {
            warn!(table = %table, "DELETE without a resolvable primary key, ignoring event");
            self.stats.record_skipped();
            return Ok(RouteOutcome::Skipped);
        }

        let rows_affected = self.sink.delete(&table.table, &key).await?;
        self.stats.record_delete();
        Ok(RouteOutcome::Applied {
            mutation: MutationKind::Delete,
            rows_affected,
        })
    }
}
