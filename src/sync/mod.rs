//! Catalog synchronization engine
//!
//! This module provides the pieces of a sync run, from admission control
//! on outbound requests up to the run orchestration and its scheduler.
//!
//! # Components
//!
//! - [`rate_limiter`]: Token-bucket limiter shared by all API attempts
//! - [`retry`]: Retry policy with exponential backoff for transient failures
//! - [`http_client`]: Rate-limited, retrying client for the catalog API
//! - [`reconcile`]: Decides create, update or skip for each remote record
//! - [`orchestrator`]: Drives paginated runs and aggregates their results
//! - [`scheduler`]: Periodic trigger host for automatic runs
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use product_sync::config::Config;
//! use product_sync::store::SqliteStore;
//! use product_sync::sync::{ApiClient, RunOptions, SyncOrchestrator};
//!
//! let config = Config::default();
//! let client = ApiClient::from_config(&config)?;
//! let store = Arc::new(SqliteStore::new(&config.database.path).await?);
//! let orchestrator = SyncOrchestrator::new(client, store.clone(), store);
//!
//! let result = orchestrator.run(RunOptions::new().with_dry_run(true)).await;
//! println!("{} records, {} errors", result.total, result.errors);
//! ```

pub mod http_client;
pub mod orchestrator;
pub mod rate_limiter;
pub mod reconcile;
pub mod retry;
pub mod scheduler;

// Re-export main types for convenience
pub use http_client::{ApiClient, ApiResponse, CatalogPage, HealthReport};
pub use orchestrator::{RunOptions, SyncOrchestrator, DEFAULT_PAGE_SIZE};
pub use rate_limiter::RateLimiter;
pub use reconcile::{Decision, ReconciliationEngine};
pub use retry::RetryPolicy;
pub use scheduler::{ManualSyncHandle, SchedulerConfig, SchedulerStatus, SyncJob, SyncScheduler};
