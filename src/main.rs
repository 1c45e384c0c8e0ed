//! product-sync - Idempotent product catalog synchronization
//!
//! Command-line entry point: one-off runs, inspection of the audit log and a
//! daemon mode hosting the periodic scheduler.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use product_sync::config::Config;
use product_sync::store::SqliteStore;
use product_sync::sync::{
    ApiClient, RunOptions, SchedulerConfig, SyncJob, SyncOrchestrator, SyncScheduler,
};
use product_sync::telemetry::init_tracing;

/// product-sync - Idempotent product catalog synchronization
#[derive(Parser, Debug)]
#[command(name = "product-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "PRODUCT_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synchronize the whole catalog once
    Sync {
        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,
        /// Compute outcomes without writing products
        #[arg(long)]
        dry_run: bool,
        /// Batch id to tag log entries with
        #[arg(long)]
        batch_id: Option<String>,
    },
    /// Synchronize a single remote record
    SyncOne {
        /// Remote record id
        external_id: String,
        /// Compute the outcome without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Check the remote catalog health endpoint
    Health,
    /// Show audit log statistics
    Stats {
        /// Restrict to one batch
        #[arg(long)]
        batch_id: Option<String>,
    },
    /// Show the most recent error entries
    Errors {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Delete non-error log entries older than the given number of days
    Prune {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Run the periodic scheduler until interrupted
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.api.base_url,
        "Starting product-sync"
    );

    let store = Arc::new(
        SqliteStore::new(&config.database.path)
            .await
            .with_context(|| format!("Failed to open database {}", config.database.path))?,
    );
    info!(path = %config.database.path, "Database initialized");

    let client = ApiClient::from_config(&config).context("Failed to build API client")?;

    match args.command {
        Command::Sync {
            limit,
            dry_run,
            batch_id,
        } => {
            let orchestrator = build_orchestrator(&config, client, &store);
            let mut options = RunOptions::new().with_dry_run(dry_run);
            if let Some(limit) = limit {
                options = options.with_limit(limit);
            }
            if let Some(batch_id) = batch_id {
                options = options.with_batch_id(batch_id);
            }

            let result = orchestrator.run(options).await;
            print_json(&result)?;
            if !result.is_completed() {
                anyhow::bail!("Sync run {} aborted", result.batch_id);
            }
        }
        Command::SyncOne {
            external_id,
            dry_run,
        } => {
            let orchestrator = build_orchestrator(&config, client, &store);
            let outcome = orchestrator
                .sync_one(&external_id, RunOptions::new().with_dry_run(dry_run))
                .await;
            print_json(&outcome)?;
        }
        Command::Health => {
            let report = client.check_health().await?;
            print_json(&report)?;
            if !report.is_healthy() {
                anyhow::bail!("Catalog API reports status {}", report.status);
            }
        }
        Command::Stats { batch_id } => {
            let stats = store.log_statistics(batch_id.as_deref()).await?;
            print_json(&stats)?;
        }
        Command::Errors { limit } => {
            let entries = store.recent_errors(limit).await?;
            print_json(&entries)?;
        }
        Command::Prune { days } => {
            let deleted = store.prune_logs(days).await?;
            info!(deleted, days, "Pruned sync logs");
            print_json(&serde_json::json!({ "deleted": deleted }))?;
        }
        Command::Daemon => {
            if !config.sync.auto_sync_enabled {
                warn!("Automatic sync is disabled (sync.auto_sync_enabled = false), exiting");
                return Ok(());
            }

            let job: Arc<dyn SyncJob> = Arc::new(build_orchestrator(&config, client, &store));
            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            let scheduler =
                SyncScheduler::new(SchedulerConfig::from(&config.sync), job, shutdown_rx);
            let handle = tokio::spawn(scheduler.run());

            shutdown_signal().await;
            let _ = shutdown_tx.send(());

            if let Err(e) = handle.await {
                error!(error = %e, "Sync scheduler task failed");
            }
        }
    }

    info!("product-sync finished");
    Ok(())
}

fn build_orchestrator(
    config: &Config,
    client: ApiClient,
    store: &Arc<SqliteStore>,
) -> SyncOrchestrator<SqliteStore, SqliteStore> {
    SyncOrchestrator::new(client, Arc::clone(store), Arc::clone(store))
        .with_page_size(config.sync.page_size)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Tracing is not initialized yet
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Resolve when Ctrl+C or SIGTERM is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
