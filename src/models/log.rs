//! Sync log entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The operation a log entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOperation {
    /// A local record was created
    Create,
    /// A local record was updated
    Update,
    /// The local record was already current
    Skip,
    /// Processing failed
    Error,
}

impl fmt::Display for LogOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogOperation::Create => "create",
            LogOperation::Update => "update",
            LogOperation::Skip => "skip",
            LogOperation::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for LogOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(LogOperation::Create),
            "update" => Ok(LogOperation::Update),
            "skip" => Ok(LogOperation::Skip),
            "error" => Ok(LogOperation::Error),
            _ => Err(format!("Invalid log operation: {}", s)),
        }
    }
}

/// Result status of a logged operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// Completed as intended
    Success,
    /// Failed
    Error,
    /// Completed with a caveat
    Warning,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
            LogStatus::Warning => "warning",
        };
        f.write_str(s)
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LogStatus::Success),
            "error" => Ok(LogStatus::Error),
            "warning" => Ok(LogStatus::Warning),
            _ => Err(format!("Invalid log status: {}", s)),
        }
    }
}

/// One audit record per processed remote record
///
/// Batch-level failures (a page that could not be fetched) are logged with
/// no `external_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Operation performed
    pub operation: LogOperation,

    /// Outcome status
    pub status: LogStatus,

    /// Remote record id, absent for batch-level entries
    pub external_id: Option<String>,

    /// SKU of the remote record
    pub sku: Option<String>,

    /// Local record touched, if any
    pub local_id: Option<i64>,

    /// Human-readable summary
    pub message: String,

    /// Error detail when `status` is error
    pub error_details: Option<String>,

    /// Remote payload as received
    pub request_snapshot: Option<Value>,

    /// What was written, or the planned write for dry runs
    pub response_snapshot: Option<Value>,

    /// Run this entry belongs to
    pub batch_id: String,

    /// Processing time in seconds
    pub execution_time: f64,

    /// HTTP retries spent on the request behind this entry
    pub retry_count: u32,

    /// Triggered by the scheduler rather than a user
    pub is_automatic: bool,

    /// When the entry was recorded
    pub created_at: DateTime<Utc>,
}

impl SyncLogEntry {
    /// Create a new entry stamped with the current time
    pub fn new(
        operation: LogOperation,
        status: LogStatus,
        batch_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            status,
            external_id: None,
            sku: None,
            local_id: None,
            message: message.into(),
            error_details: None,
            request_snapshot: None,
            response_snapshot: None,
            batch_id: batch_id.into(),
            execution_time: 0.0,
            retry_count: 0,
            is_automatic: false,
            created_at: Utc::now(),
        }
    }

    /// Set the remote record identity
    pub fn with_record(mut self, external_id: impl Into<String>, sku: Option<String>) -> Self {
        self.external_id = Some(external_id.into());
        self.sku = sku;
        self
    }

    /// Set the local record id
    pub fn with_local_id(mut self, local_id: Option<i64>) -> Self {
        self.local_id = local_id;
        self
    }

    /// Set the error details
    pub fn with_error(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }

    /// Set the request and response snapshots
    pub fn with_snapshots(mut self, request: Option<Value>, response: Option<Value>) -> Self {
        self.request_snapshot = request;
        self.response_snapshot = response;
        self
    }

    /// Set the processing time in seconds
    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = seconds;
        self
    }

    /// Set the retry count
    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    /// Mark the entry as scheduler-triggered
    pub fn with_automatic(mut self, is_automatic: bool) -> Self {
        self.is_automatic = is_automatic;
        self
    }

    /// True for per-record entries, false for batch-level ones
    pub fn is_record_level(&self) -> bool {
        self.external_id.is_some()
    }
}
