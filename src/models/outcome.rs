//! Per-record outcomes and run results

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use super::product::ProductDiff;

/// Classification of a processed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// A local record was created (or would be, in a dry run)
    Created,
    /// A local record was updated (or would be)
    Updated,
    /// The local record already matched
    Skipped,
    /// The record could not be processed
    Errored,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Created => "created",
            OutcomeKind::Updated => "updated",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Outcome of processing one remote record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    /// Remote record id
    pub external_id: String,
    /// Remote SKU
    pub sku: Option<String>,
    /// Classification
    pub kind: OutcomeKind,
    /// Field changes, for updates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<ProductDiff>,
    /// Local record touched, if any
    pub local_id: Option<i64>,
    /// Failure description, for errored outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    /// Create an outcome without diff or error
    pub fn new(external_id: impl Into<String>, sku: Option<String>, kind: OutcomeKind) -> Self {
        Self {
            external_id: external_id.into(),
            sku,
            kind,
            diff: None,
            local_id: None,
            error: None,
        }
    }

    /// Create an errored outcome
    pub fn errored(
        external_id: impl Into<String>,
        sku: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(external_id, sku, OutcomeKind::Errored)
        }
    }

    /// Set the local record id
    pub fn with_local_id(mut self, local_id: Option<i64>) -> Self {
        self.local_id = local_id;
        self
    }

    /// Set the diff
    pub fn with_diff(mut self, diff: ProductDiff) -> Self {
        self.diff = Some(diff);
        self
    }
}

/// Outcome counters of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounters {
    /// Records considered
    pub total: u64,
    /// Records created
    pub created: u64,
    /// Records updated
    pub updated: u64,
    /// Records skipped
    pub skipped: u64,
    /// Errors, including batch-level fetch failures
    pub errors: u64,
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every page was fetched
    Completed,
    /// A page fetch failed and the run stopped early
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::Aborted => f.write_str("aborted"),
        }
    }
}

/// Summary of one sync run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    /// Identifier shared by every log entry of the run
    pub batch_id: String,
    /// Records considered
    pub total: u64,
    /// Records created
    pub created: u64,
    /// Records updated
    pub updated: u64,
    /// Records skipped
    pub skipped: u64,
    /// Errors, including batch-level fetch failures
    pub errors: u64,
    /// Wall-clock duration of the run, serialized in seconds
    #[serde(serialize_with = "serialize_secs")]
    pub execution_time: Duration,
    /// Terminal status
    pub status: RunStatus,
    /// Whether the run was a dry run
    pub dry_run: bool,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl SyncResult {
    /// Start an empty result for a batch
    pub fn new(batch_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            batch_id: batch_id.into(),
            total: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            errors: 0,
            execution_time: Duration::ZERO,
            status: RunStatus::Completed,
            dry_run,
        }
    }

    /// Count one record outcome
    pub fn record(&mut self, outcome: &SyncOutcome) {
        self.total += 1;
        match outcome.kind {
            OutcomeKind::Created => self.created += 1,
            OutcomeKind::Updated => self.updated += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::Errored => self.errors += 1,
        }
    }

    /// Count a batch-level failure and mark the run aborted
    pub fn abort(&mut self) {
        self.errors += 1;
        self.status = RunStatus::Aborted;
    }

    /// Counter snapshot, handy for comparing runs
    pub fn counters(&self) -> SyncCounters {
        SyncCounters {
            total: self.total,
            created: self.created,
            updated: self.updated,
            skipped: self.skipped,
            errors: self.errors,
        }
    }

    /// True when the run fetched every page
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}
