//! streamshift - change-data applier
//!
//! Applies a stream of Debezium-style row change events onto a PostgreSQL
//! replica so the target table becomes and stays a live copy of its source.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Transport │──▶│ Event Router │──▶│ Schema Catalog│   │ Target store │
//! │ (broker)  │   │  decode, op  │   │ cache, DDL    │──▶│  DDL + DML   │
//! └───────────┘   └──────┬───────┘   └───────────────┘   └──────▲───────┘
//!                        │           ┌───────────────┐          │
//!                        └──────────▶│ Table Sink    │──────────┘
//!                                    │ coerce + SQL  │
//!                                    └───────────────┘
//! ```
//!
//! - [`router::EventRouter`] decodes an envelope and picks insert, upsert,
//!   update or delete
//! - [`catalog::SchemaCatalog`] creates missing target tables (cloned from the
//!   source catalog, or inferred from the row) and caches primary keys
//! - [`applier::SqlTableSink`] builds parameterized statements and runs them
//! - [`delivery::DeliveryPolicy`] decides between drop, retry and dead-letter
//! - [`runner::ReplicationRunner`] shards topics onto workers and acknowledges
//!
//! # Usage
//!
//! ```bash
//! # Replicate from a JSON-lines file of envelopes
//! streamshift run -c streamshift.yaml --input events.jsonl
//!
//! # Validate configuration
//! streamshift validate -c streamshift.yaml
//!
//! # Check connectivity to source and target
//! streamshift check -c streamshift.yaml
//! ```

pub mod applier;
pub mod catalog;
pub mod coercion;
pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod retry;
pub mod router;
pub mod runner;
pub mod stats;
pub mod testing;
pub mod transport;
pub mod types;

pub use applier::{SqlTableSink, TableSink};
pub use catalog::{SchemaCatalog, TableMetadata, TableOrigin};
pub use config::ReplicatorConfig;
pub use delivery::{DeadLetterSink, DeliveryPolicy, Disposition};
pub use error::{ReplicationError, Result};
pub use event::{ChangeEvent, Operation};
pub use router::{EventRouter, MutationKind, RouteOutcome};
pub use runner::ReplicationRunner;
pub use stats::{ReplicationStats, ReplicationStatsSnapshot};
pub use transport::{InboundMessage, MessageTransport};
pub use types::{SensitiveString, TableId};

pub use async_trait::async_trait;
