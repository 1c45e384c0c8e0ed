//! Sync run orchestration
//!
//! A run pages through the remote catalog, reconciles each record against
//! the product store, applies the resulting write (unless dry-running),
//! emits exactly one log entry per record and folds the outcomes into a
//! [`SyncResult`]. A page that cannot be fetched aborts the run with a
//! single batch-level log entry.

use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::http_client::ApiClient;
use super::reconcile::{Decision, ReconciliationEngine};
use crate::error::{ClientError, SyncError};
use crate::models::{
    ExternalProduct, LogOperation, LogStatus, OutcomeKind, SyncLogEntry, SyncOutcome, SyncResult,
};
use crate::store::{LogSink, ProductStore};

/// Default number of records requested per page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Options for a single run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Stop after this many records
    pub limit: Option<usize>,
    /// Compute outcomes and logs without writing products
    pub dry_run: bool,
    /// Correlation id for log entries; generated when absent
    pub batch_id: Option<String>,
    /// Triggered by the scheduler rather than a user
    pub is_automatic: bool,
}

impl RunOptions {
    /// Options for a manual, unlimited, writing run
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a scheduler-triggered run
    pub fn automatic() -> Self {
        Self {
            is_automatic: true,
            ..Self::default()
        }
    }

    /// Cap the number of processed records
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Enable or disable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Use a caller-supplied batch id
    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }
}

/// Per-run values stamped on every log entry
struct RunContext {
    batch_id: String,
    dry_run: bool,
    is_automatic: bool,
}

impl RunContext {
    fn from_options(options: &RunOptions) -> Self {
        Self {
            batch_id: options
                .batch_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            dry_run: options.dry_run,
            is_automatic: options.is_automatic,
        }
    }

    fn entry(&self, operation: LogOperation, status: LogStatus, message: String) -> SyncLogEntry {
        let message = if self.dry_run {
            format!("[DRY RUN] {}", message)
        } else {
            message
        };
        SyncLogEntry::new(operation, status, self.batch_id.as_str(), message)
            .with_automatic(self.is_automatic)
    }
}

/// Drives full and single-record synchronization runs
pub struct SyncOrchestrator<S, L> {
    client: ApiClient,
    store: Arc<S>,
    logs: Arc<L>,
    page_size: usize,
}

impl<S, L> SyncOrchestrator<S, L>
where
    S: ProductStore,
    L: LogSink,
{
    /// Create an orchestrator over a client, a product store and a log sink
    pub fn new(client: ApiClient, store: Arc<S>, logs: Arc<L>) -> Self {
        Self {
            client,
            store,
            logs,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the number of records requested per page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The API client used for fetches
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// The product store written to
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run a full synchronization
    ///
    /// Never fails: partial failures are counted in `errors` and a failed
    /// page fetch ends the run with status `aborted`.
    pub async fn run(&self, options: RunOptions) -> SyncResult {
        let ctx = RunContext::from_options(&options);
        let started = Instant::now();
        let mut result = SyncResult::new(ctx.batch_id.as_str(), ctx.dry_run);
        let mut engine = ReconciliationEngine::new();

        info!(
            batch_id = %ctx.batch_id,
            dry_run = ctx.dry_run,
            limit = ?options.limit,
            is_automatic = ctx.is_automatic,
            "Starting product sync"
        );

        let mut offset = 0usize;
        'pages: loop {
            let remaining = options
                .limit
                .map(|limit| limit.saturating_sub(result.total as usize));
            if remaining == Some(0) {
                break;
            }
            let page_limit = remaining.map_or(self.page_size, |r| r.min(self.page_size));

            let page = match self.client.fetch_page(offset, page_limit).await {
                Ok(page) => page,
                Err(e) => {
                    self.abort(&ctx, offset, &e, started, &mut result).await;
                    break;
                }
            };

            let fetched = page.items.len();
            let retries = page.attempts.saturating_sub(1);
            for item in page.items {
                if options
                    .limit
                    .is_some_and(|limit| result.total as usize >= limit)
                {
                    break 'pages;
                }
                let outcome = self.process_item(item, retries, &ctx, &mut engine).await;
                result.record(&outcome);
            }

            offset += fetched;
            let exhausted = match page.total {
                Some(total) => offset as u64 >= total,
                None => fetched < page_limit,
            };
            if fetched == 0 || exhausted {
                break;
            }
        }

        result.execution_time = started.elapsed();

        if result.is_completed() {
            info!(
                batch_id = %result.batch_id,
                total = result.total,
                created = result.created,
                updated = result.updated,
                skipped = result.skipped,
                errors = result.errors,
                execution_time_secs = result.execution_time.as_secs_f64(),
                "Product sync completed"
            );
        } else {
            error!(
                batch_id = %result.batch_id,
                total = result.total,
                errors = result.errors,
                "Product sync aborted"
            );
        }

        result
    }

    /// Fetch and process a single remote record
    ///
    /// A fetch failure becomes an errored outcome; nothing is aborted.
    pub async fn sync_one(&self, external_id: &str, options: RunOptions) -> SyncOutcome {
        let ctx = RunContext::from_options(&options);
        let started = Instant::now();

        match self.client.fetch_product(external_id).await {
            Ok(response) => {
                let retries = response.retries();
                let mut engine = ReconciliationEngine::new();
                self.process_item(response.body, retries, &ctx, &mut engine)
                    .await
            }
            Err(e) => {
                let retries = e.attempts().saturating_sub(1);
                let err = SyncError::Fetch(e);
                let entry = ctx
                    .entry(
                        LogOperation::Error,
                        LogStatus::Error,
                        format!("Failed to fetch product {}", external_id),
                    )
                    .with_record(external_id, None)
                    .with_error(err.to_string())
                    .with_retry_count(retries)
                    .with_execution_time(started.elapsed().as_secs_f64());
                self.emit(entry).await;

                SyncOutcome::errored(external_id, None, err.to_string())
            }
        }
    }

    /// Decode one raw page item and process it
    async fn process_item(
        &self,
        item: Value,
        retries: u32,
        ctx: &RunContext,
        engine: &mut ReconciliationEngine,
    ) -> SyncOutcome {
        let started = Instant::now();

        match ExternalProduct::from_payload(item.clone()) {
            Ok(product) => {
                self.process_product(&product, retries, ctx, engine, started)
                    .await
            }
            Err(err) => {
                let external_id = raw_id(&item);
                let mut entry = ctx
                    .entry(
                        LogOperation::Error,
                        LogStatus::Error,
                        "Skipping malformed product record".to_string(),
                    )
                    .with_error(err.to_string())
                    .with_snapshots(Some(item), None)
                    .with_retry_count(retries)
                    .with_execution_time(started.elapsed().as_secs_f64());
                if let Some(id) = &external_id {
                    entry = entry.with_record(id.as_str(), None);
                }
                self.emit(entry).await;

                SyncOutcome::errored(external_id.unwrap_or_default(), None, err.to_string())
            }
        }
    }

    /// Reconcile, persist and log one decoded record
    async fn process_product(
        &self,
        product: &ExternalProduct,
        retries: u32,
        ctx: &RunContext,
        engine: &mut ReconciliationEngine,
        started: Instant,
    ) -> SyncOutcome {
        let decision = match engine.reconcile(product, self.store.as_ref()).await {
            Ok(decision) => decision,
            Err(e) => {
                return self
                    .record_failure(product, SyncError::Reconcile(e), None, retries, ctx, started)
                    .await
            }
        };

        let kind = decision.kind();
        let (local_id, response_snapshot, diff) = match decision {
            Decision::Create { fields } => {
                let snapshot = serde_json::to_value(&fields).ok();
                if ctx.dry_run {
                    (None, snapshot, None)
                } else {
                    match self.store.create(&fields).await {
                        Ok(local) => (Some(local.id), snapshot, None),
                        Err(e) => {
                            engine.release_create(&fields);
                            return self
                                .record_failure(product, e.into(), None, retries, ctx, started)
                                .await
                        }
                    }
                }
            }
            Decision::Update { target, diff } => {
                let snapshot = serde_json::to_value(&diff).ok();
                if !ctx.dry_run {
                    if let Err(e) = self.store.update(&target, &diff).await {
                        engine.release_update(target.id);
                        return self
                            .record_failure(
                                product,
                                e.into(),
                                Some(target.id),
                                retries,
                                ctx,
                                started,
                            )
                            .await;
                    }
                }
                (Some(target.id), snapshot, Some(diff))
            }
            Decision::Skip { target } => (Some(target.id), None, None),
        };

        let (operation, status, message) = match kind {
            OutcomeKind::Created if product.sku.is_none() => (
                LogOperation::Create,
                LogStatus::Warning,
                format!(
                    "Created product {} without SKU; it cannot be matched by SKU",
                    product.name
                ),
            ),
            OutcomeKind::Created => (
                LogOperation::Create,
                LogStatus::Success,
                format!("Created product {}", product.name),
            ),
            OutcomeKind::Updated => (
                LogOperation::Update,
                LogStatus::Success,
                format!(
                    "Updated product {} ({})",
                    product.name,
                    diff.as_ref()
                        .map(|d| d.field_names().join(", "))
                        .unwrap_or_default()
                ),
            ),
            _ => (
                LogOperation::Skip,
                LogStatus::Success,
                format!("Product {} is up to date", product.name),
            ),
        };

        let entry = ctx
            .entry(operation, status, message)
            .with_record(product.external_id.as_str(), product.sku.clone())
            .with_local_id(local_id)
            .with_snapshots(Some(product.raw_payload.clone()), response_snapshot)
            .with_retry_count(retries)
            .with_execution_time(started.elapsed().as_secs_f64());
        self.emit(entry).await;

        let mut outcome = SyncOutcome::new(product.external_id.as_str(), product.sku.clone(), kind)
            .with_local_id(local_id);
        if let Some(diff) = diff {
            outcome = outcome.with_diff(diff);
        }
        outcome
    }

    /// Turn a per-record failure into an errored outcome and its log entry
    async fn record_failure(
        &self,
        product: &ExternalProduct,
        err: SyncError,
        local_id: Option<i64>,
        retries: u32,
        ctx: &RunContext,
        started: Instant,
    ) -> SyncOutcome {
        let entry = ctx
            .entry(
                LogOperation::Error,
                LogStatus::Error,
                format!("Failed to sync product {}", product.name),
            )
            .with_record(product.external_id.as_str(), product.sku.clone())
            .with_local_id(local_id)
            .with_error(err.to_string())
            .with_snapshots(Some(product.raw_payload.clone()), None)
            .with_retry_count(retries)
            .with_execution_time(started.elapsed().as_secs_f64());
        self.emit(entry).await;

        SyncOutcome::errored(product.external_id.as_str(), product.sku.clone(), err.to_string())
            .with_local_id(local_id)
    }

    /// Record a batch-level fetch failure and mark the run aborted
    async fn abort(
        &self,
        ctx: &RunContext,
        offset: usize,
        err: &ClientError,
        started: Instant,
        result: &mut SyncResult,
    ) {
        let entry = ctx
            .entry(
                LogOperation::Error,
                LogStatus::Error,
                format!("Failed to fetch products at offset {}", offset),
            )
            .with_error(err.to_string())
            .with_retry_count(err.attempts().saturating_sub(1))
            .with_execution_time(started.elapsed().as_secs_f64());
        self.emit(entry).await;
        result.abort();
    }

    /// Mirror an entry to tracing and append it to the log sink
    async fn emit(&self, entry: SyncLogEntry) {
        match entry.status {
            LogStatus::Success => debug!(
                batch_id = %entry.batch_id,
                external_id = ?entry.external_id,
                operation = %entry.operation,
                "{}",
                entry.message
            ),
            LogStatus::Warning => warn!(
                batch_id = %entry.batch_id,
                external_id = ?entry.external_id,
                operation = %entry.operation,
                "{}",
                entry.message
            ),
            LogStatus::Error => warn!(
                batch_id = %entry.batch_id,
                external_id = ?entry.external_id,
                error = ?entry.error_details,
                "{}",
                entry.message
            ),
        }

        if let Err(e) = self.logs.append(&entry).await {
            warn!(batch_id = %entry.batch_id, error = %e, "Failed to append sync log entry");
        }
    }
}

/// Best-effort id of an undecodable record, for logging
fn raw_id(item: &Value) -> Option<String> {
    ["external_id", "id"].iter().find_map(|key| match item.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
