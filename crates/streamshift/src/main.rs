//! streamshift - change-data applier
//!
//! # Usage
//!
//! ```bash
//! # Replicate envelopes read from a JSON-lines file (stdin when omitted)
//! streamshift run -c streamshift.yaml --input events.jsonl
//!
//! # Validate configuration
//! streamshift validate -c streamshift.yaml
//!
//! # Check connectivity to source and target
//! streamshift check -c streamshift.yaml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use streamshift::config::ReplicatorConfig;
use streamshift::transport::{JsonLinesTransport, MessageTransport};
use streamshift::{EventRouter, ReplicationRunner, ReplicationStats, SchemaCatalog, SqlTableSink};
use streamshift_rdbc::prelude::*;

#[derive(Parser)]
#[command(name = "streamshift")]
#[command(version, about = "Applies change-data-capture events onto a PostgreSQL replica")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "streamshift.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate change events (default)
    Run {
        /// JSON-lines file of envelopes; reads stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,

        /// Topic prefix for messages read from the input
        #[arg(long, default_value = "dbserver1")]
        topic_prefix: String,
    },
    /// Validate configuration file
    Validate,
    /// Check connectivity to the source and target stores
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config = ReplicatorConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run {
        input: None,
        topic_prefix: "dbserver1".to_string(),
    }) {
        Commands::Run {
            input,
            topic_prefix,
        } => run(config, input, topic_prefix).await,
        Commands::Validate => validate_config(&config),
        Commands::Check => check_connectivity(&config).await,
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
    }
}

async fn open_store(name: &str, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
    let conn = connect(config)
        .await
        .with_context(|| format!("Failed to connect to {} at {}", name, config.redacted_url()))?;
    info!(store = name, url = %config.redacted_url(), "Connected");
    Ok(Arc::from(conn))
}

async fn run(config: ReplicatorConfig, input: Option<PathBuf>, topic_prefix: String) -> Result<()> {
    info!("Starting streamshift");

    let source_conn = open_store("source", &config.source.connection_config()).await?;
    let target_conn = open_store("target", &config.target.connection_config()).await?;
    let dialect: Arc<dyn SqlDialect> = Arc::new(PostgresDialect);

    let stats = Arc::new(ReplicationStats::new());
    let source_catalog = InformationSchemaProvider::new(source_conn.clone(), dialect.clone())
        .with_default_schema(&config.source.schema);
    let target_catalog = InformationSchemaProvider::new(target_conn.clone(), dialect.clone())
        .with_default_schema(&config.target.schema);

    let catalog = SchemaCatalog::new(
        Arc::new(source_catalog),
        Arc::new(target_catalog),
        target_conn.clone(),
        dialect.clone(),
    )
    .with_source_schema(&config.source.schema)
    .with_target_schema(&config.target.schema)
    .with_lenient_table_lookup(config.catalog.lenient_table_lookup)
    .with_stats(stats.clone());

    let sink = SqlTableSink::new(target_conn.clone(), dialect).with_schema(&config.target.schema);
    let router = EventRouter::new(Arc::new(catalog), Arc::new(sink)).with_stats(stats);

    let transport: Arc<dyn MessageTransport> = match &input {
        Some(path) => Arc::new(
            JsonLinesTransport::open(path, &topic_prefix)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?,
        ),
        None => Arc::new(JsonLinesTransport::stdin(&topic_prefix)),
    };

    let topic_filter = config
        .subscription
        .topic_regex()
        .context("Invalid topic pattern")?;
    let policy = config.delivery.build_policy().await?;
    info!(
        group = %config.subscription.group,
        topic_pattern = %config.subscription.topic_pattern,
        policy = policy.name(),
        "Subscribed"
    );

    let runner = ReplicationRunner::new(transport, Arc::new(router), policy)
        .with_workers(config.workers)
        .with_topic_filter(topic_filter);

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal (Ctrl+C)");
            let _ = shutdown_tx.send(());
        }
    });

    let result = runner.run(shutdown_rx).await;

    for conn in [source_conn, target_conn] {
        if let Err(e) = conn.close().await {
            error!(error = %e, "Failed to close connection");
        }
    }

    let snapshot = result?;
    info!(mutations = snapshot.mutations(), "Shutdown complete");
    Ok(())
}

fn validate_config(config: &ReplicatorConfig) -> Result<()> {
    println!("Configuration is valid");
    println!("  source:   {}", config.source.connection_config().redacted_url());
    println!("  target:   {}", config.target.connection_config().redacted_url());
    println!("  topics:   {}", config.subscription.topic_pattern);
    println!("  group:    {}", config.subscription.group);
    println!("  delivery: {:?}", config.delivery.policy);
    println!("  workers:  {}", config.workers);
    Ok(())
}

async fn check_connectivity(config: &ReplicatorConfig) -> Result<()> {
    let mut failed = 0;

    for (name, store) in [("source", &config.source), ("target", &config.target)] {
        let conn_config = store.connection_config();
        match connect(&conn_config).await {
            Ok(conn) => {
                let valid = conn.is_valid().await;
                let _ = conn.close().await;
                if valid {
                    println!("✓ {} ({})", name, conn_config.redacted_url());
                } else {
                    println!("✗ {} ({}): connection not usable", name, conn_config.redacted_url());
                    failed += 1;
                }
            }
            Err(e) => {
                println!("✗ {} ({}): {}", name, conn_config.redacted_url(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} store(s) unreachable", failed);
    }
    Ok(())
}
