//! Periodic trigger host for automatic catalog synchronization
//!
//! The scheduler runs a [`SyncJob`] every configured interval after an
//! initial delay, optionally adding jitter, and serves on-demand runs
//! through a [`ManualSyncHandle`]. Shutdown takes effect between runs.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::orchestrator::{RunOptions, SyncOrchestrator};
use crate::config::SyncConfig;
use crate::error::SchedulerError;
use crate::models::SyncResult;
use crate::store::{LogSink, ProductStore};

/// Configuration for the sync scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Time between automatic runs
    pub interval: Duration,
    /// Delay before the first automatic run
    pub initial_delay: Duration,
    /// Upper bound of random seconds added to each interval
    pub jitter_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            initial_delay: Duration::from_secs(5),
            jitter_secs: 0,
        }
    }
}

impl From<&SyncConfig> for SchedulerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            interval: config.interval(),
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            jitter_secs: config.jitter_secs,
        }
    }
}

impl SchedulerConfig {
    fn next_delay(&self) -> Duration {
        let jitter = if self.jitter_secs > 0 {
            rand::thread_rng().gen_range(0..self.jitter_secs)
        } else {
            0
        };
        self.interval + Duration::from_secs(jitter)
    }
}

/// Status of the scheduled job
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    /// When the last run finished
    pub last_run: Option<SystemTime>,
    /// Result of the last run
    pub last_result: Option<SyncResult>,
    /// Estimated start of the next automatic run
    pub next_run: Option<SystemTime>,
    /// Whether a run is currently in progress
    pub in_progress: bool,
    /// Runs performed since start, manual ones included
    pub runs: u64,
}

/// A synchronization the scheduler can trigger
#[async_trait]
pub trait SyncJob: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Perform one run
    async fn run_sync(&self, options: RunOptions) -> SyncResult;
}

#[async_trait]
impl<S, L> SyncJob for SyncOrchestrator<S, L>
where
    S: ProductStore,
    L: LogSink,
{
    fn name(&self) -> &str {
        "product-catalog"
    }

    async fn run_sync(&self, options: RunOptions) -> SyncResult {
        self.run(options).await
    }
}

/// Manual sync request
struct ManualSyncRequest {
    options: RunOptions,
    response: mpsc::Sender<SyncResult>,
}

/// Periodic scheduler for a sync job
pub struct SyncScheduler {
    config: SchedulerConfig,
    job: Arc<dyn SyncJob>,
    status: Arc<RwLock<SchedulerStatus>>,
    shutdown_rx: broadcast::Receiver<()>,
    manual_sync_rx: mpsc::Receiver<ManualSyncRequest>,
    manual_sync_tx: mpsc::Sender<ManualSyncRequest>,
}

impl SyncScheduler {
    /// Create a new sync scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Scheduler configuration
    /// * `job` - The job to run
    /// * `shutdown_rx` - Broadcast receiver for shutdown signal
    pub fn new(
        config: SchedulerConfig,
        job: Arc<dyn SyncJob>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (manual_sync_tx, manual_sync_rx) = mpsc::channel(32);

        Self {
            config,
            job,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            shutdown_rx,
            manual_sync_rx,
            manual_sync_tx,
        }
    }

    /// Get a handle for triggering manual syncs
    pub fn manual_sync_handle(&self) -> ManualSyncHandle {
        ManualSyncHandle {
            tx: self.manual_sync_tx.clone(),
        }
    }

    /// Shared status, readable while the scheduler runs
    pub fn status_handle(&self) -> Arc<RwLock<SchedulerStatus>> {
        self.status.clone()
    }

    /// Get the current status
    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    /// Run the scheduler until a shutdown signal arrives
    pub async fn run(mut self) {
        let job_name = self.job.name().to_string();
        info!(
            job = job_name,
            interval_secs = self.config.interval.as_secs(),
            initial_delay_secs = self.config.initial_delay.as_secs(),
            "Starting sync scheduler"
        );

        let mut next_run = Instant::now() + self.config.initial_delay;
        self.set_next_run(self.config.initial_delay).await;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync scheduler");
                    break;
                }
                Some(request) = self.manual_sync_rx.recv() => {
                    info!(job = job_name, "Manual sync triggered");
                    let result = self.perform_sync(request.options).await;
                    let _ = request.response.send(result).await;
                }
                _ = sleep_until(next_run) => {
                    info!(job = job_name, "Performing scheduled sync");
                    self.perform_sync(RunOptions::automatic()).await;

                    let delay = self.config.next_delay();
                    debug!(job = job_name, delay_secs = delay.as_secs(), "Scheduled next sync");
                    next_run = Instant::now() + delay;
                    self.set_next_run(delay).await;
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn set_next_run(&self, delay: Duration) {
        self.status.write().await.next_run = Some(SystemTime::now() + delay);
    }

    async fn perform_sync(&self, options: RunOptions) -> SyncResult {
        self.status.write().await.in_progress = true;

        let result = self.job.run_sync(options).await;
        if !result.is_completed() {
            warn!(
                job = self.job.name(),
                batch_id = %result.batch_id,
                "Scheduled sync aborted"
            );
        }

        let mut status = self.status.write().await;
        status.in_progress = false;
        status.last_run = Some(SystemTime::now());
        status.last_result = Some(result.clone());
        status.runs += 1;

        result
    }
}

/// Handle for triggering manual syncs
#[derive(Clone)]
pub struct ManualSyncHandle {
    tx: mpsc::Sender<ManualSyncRequest>,
}

impl ManualSyncHandle {
    /// Trigger a run and wait for its result
    pub async fn trigger_sync(&self, options: RunOptions) -> Result<SyncResult, SchedulerError> {
        let (response_tx, mut response_rx) = mpsc::channel(1);

        self.tx
            .send(ManualSyncRequest {
                options,
                response: response_tx,
            })
            .await
            .map_err(|_| SchedulerError::NotRunning)?;

        response_rx.recv().await.ok_or(SchedulerError::NoResponse)
    }
}
