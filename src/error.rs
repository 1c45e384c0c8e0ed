//! Error types for product-sync
//!
//! This module defines the error taxonomy used by the synchronization engine.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Failure of a single HTTP attempt against the remote catalog
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused or reset
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by upstream (HTTP 429)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Server error (HTTP 5xx)
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Server-side request timeout (HTTP 408)
    #[error("Request timeout: HTTP 408")]
    RequestTimeout,

    /// Request rejected by the server (HTTP 4xx)
    #[error("Client error: HTTP {status}: {body}")]
    ClientStatus {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Response body could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    Request(String),

    /// Generic transport error
    #[error("Network error: {0}")]
    Network(String),
}

/// Whether an error is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to resolve on retry
    Transient,
    /// Will never succeed unmodified
    Permanent,
}

/// Trait for classifying errors for the retry loop
pub trait RetryableError {
    /// Map the error to a retry class
    fn classify(&self) -> ErrorClass;

    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Transient
    }
}

impl RetryableError for ApiError {
    fn classify(&self) -> ErrorClass {
        match self {
            ApiError::NetworkTimeout
            | ApiError::ConnectionRefused
            | ApiError::RateLimited(_)
            | ApiError::RequestTimeout
            | ApiError::Network(_) => ErrorClass::Transient,
            ApiError::ServerError(code) if *code >= 500 => ErrorClass::Transient,

            ApiError::ServerError(_)
            | ApiError::ClientStatus { .. }
            | ApiError::InvalidData(_)
            | ApiError::Request(_) => ErrorClass::Permanent,
        }
    }
}

/// Error returned by the API client after its retry loop has finished
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    /// Permanent failure, surfaced without retrying
    #[error("Request rejected after {attempts} attempt(s): {source}")]
    Permanent {
        /// Attempts made, including the failing one
        attempts: u32,
        /// Underlying cause
        source: ApiError,
    },

    /// Transient failures persisted through every retry
    #[error("Request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Last underlying cause
        last: ApiError,
    },
}

impl ClientError {
    /// Number of HTTP attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            ClientError::Permanent { attempts, .. } => *attempts,
            ClientError::RetriesExhausted { attempts, .. } => *attempts,
        }
    }

    /// The last underlying attempt error
    pub fn cause(&self) -> &ApiError {
        match self {
            ClientError::Permanent { source, .. } => source,
            ClientError::RetriesExhausted { last, .. } => last,
        }
    }
}

/// Product store and log sink errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection-level error from the async SQLite wrapper
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Write rejected by the store
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// Stored data could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, msg))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation(msg.unwrap_or_else(|| code.to_string()))
            }
            tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
            other => StoreError::Connection(other.to_string()),
        }
    }
}

/// Reconciliation failures for a single remote record
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Several local records share the SKU used for the fallback match
    #[error("Ambiguous SKU {sku}: matches local records {local_ids:?}")]
    AmbiguousSku {
        /// SKU looked up
        sku: String,
        /// Local records carrying it
        local_ids: Vec<i64>,
    },

    /// The SKU match is already bound to a different external id
    #[error("SKU {sku} belongs to local record {local_id} bound to external id {bound_to}")]
    SkuBoundElsewhere {
        /// SKU looked up
        sku: String,
        /// Matched local record
        local_id: i64,
        /// External id the local record is bound to
        bound_to: String,
    },

    /// Another remote record in the same batch already claimed this SKU
    #[error("SKU collision on {sku}: already claimed by external id {claimed_by}")]
    SkuCollision {
        /// Colliding SKU
        sku: String,
        /// External id that claimed it first
        claimed_by: String,
    },

    /// The same external id appeared twice in one batch
    #[error("Duplicate external id {0} in batch")]
    DuplicateExternalId(String),

    /// Lookup against the product store failed
    #[error("Lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

impl ReconcileError {
    /// Returns true for data-integrity conditions (as opposed to store failures)
    pub fn is_ambiguity(&self) -> bool {
        !matches!(self, ReconcileError::Lookup(_))
    }
}

/// Per-record synchronization failure
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote fetch failed
    #[error("Fetch failed: {0}")]
    Fetch(#[from] ClientError),

    /// Reconciliation refused the record
    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    /// The product store rejected a write
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// The remote record is malformed
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Scheduler communication errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    /// The scheduler loop is not running
    #[error("Scheduler not running")]
    NotRunning,

    /// The scheduler dropped the request without answering
    #[error("No response from scheduler")]
    NoResponse,
}
