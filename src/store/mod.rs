//! Persistence collaborators for product-sync
//!
//! The engine reads and writes products only through [`ProductStore`] and
//! records audit entries only through [`LogSink`]. Both are shared resources
//! the engine never assumes exclusive access to.

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{LocalProductRef, ProductDiff, ProductFields, SyncLogEntry};

/// Product persistence
///
/// Each call is assumed transactional on its own; the engine does not span
/// transactions across a batch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Find the local record bound to a remote id
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocalProductRef>, StoreError>;

    /// Find every local record carrying a SKU
    async fn find_by_sku(&self, sku: &str) -> Result<Vec<LocalProductRef>, StoreError>;

    /// Create a local record
    async fn create(&self, fields: &ProductFields) -> Result<LocalProductRef, StoreError>;

    /// Apply a diff to an existing local record
    async fn update(
        &self,
        target: &LocalProductRef,
        diff: &ProductDiff,
    ) -> Result<LocalProductRef, StoreError>;
}

/// Durable audit log
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Append one entry
    async fn append(&self, entry: &SyncLogEntry) -> Result<(), StoreError>;
}

/// Aggregate view over stored log entries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogStatistics {
    /// Entries considered
    pub total: u64,
    /// Entries with status success
    pub success: u64,
    /// Entries with status error
    pub errors: u64,
    /// Entries with status warning
    pub warnings: u64,
    /// Create operations
    pub created: u64,
    /// Update operations
    pub updated: u64,
    /// Skip operations
    pub skipped: u64,
    /// Mean execution time in seconds
    pub avg_execution_time: f64,
    /// Summed execution time in seconds
    pub total_execution_time: f64,
    /// Percentage of entries with status success
    pub success_rate: f64,
}

impl LogStatistics {
    /// Build statistics from a set of entries
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a SyncLogEntry>) -> Self {
        use crate::models::{LogOperation, LogStatus};

        let mut stats = LogStatistics::default();
        for entry in entries {
            stats.total += 1;
            stats.total_execution_time += entry.execution_time;
            match entry.status {
                LogStatus::Success => stats.success += 1,
                LogStatus::Error => stats.errors += 1,
                LogStatus::Warning => stats.warnings += 1,
            }
            match entry.operation {
                LogOperation::Create => stats.created += 1,
                LogOperation::Update => stats.updated += 1,
                LogOperation::Skip => stats.skipped += 1,
                LogOperation::Error => {}
            }
        }
        stats.finish();
        stats
    }

    fn finish(&mut self) {
        if self.total > 0 {
            self.avg_execution_time = self.total_execution_time / self.total as f64;
            self.success_rate = self.success as f64 / self.total as f64 * 100.0;
        }
    }
}
