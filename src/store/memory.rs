//! In-memory product store and log sink
//!
//! Keeps products and log entries in process memory. Used for tests and dry
//! experiments; write failures can be injected per external id.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

use super::{LogSink, ProductStore};
use crate::error::StoreError;
use crate::models::{LocalProductRef, ProductDiff, ProductFields, SyncLogEntry};

#[derive(Default)]
struct Inner {
    products: BTreeMap<i64, LocalProductRef>,
    next_id: i64,
    logs: Vec<SyncLogEntry>,
    rejected_ids: HashSet<String>,
    reject_logs: bool,
    writes: u64,
}

impl Inner {
    fn external_id_taken(&self, external_id: &str, except: Option<i64>) -> bool {
        self.products.values().any(|p| {
            Some(p.id) != except && p.fields.external_id.as_deref() == Some(external_id)
        })
    }

    fn check_rejected(&self, fields: &ProductFields) -> Result<(), StoreError> {
        match &fields.external_id {
            Some(id) if self.rejected_ids.contains(id) => Err(StoreError::Rejected(format!(
                "writes for external id {} are rejected",
                id
            ))),
            _ => Ok(()),
        }
    }

    fn insert(&mut self, fields: &ProductFields) -> Result<LocalProductRef, StoreError> {
        if let Some(id) = &fields.external_id {
            if self.external_id_taken(id, None) {
                return Err(StoreError::ConstraintViolation(format!(
                    "external_id {} already exists",
                    id
                )));
            }
        }

        self.next_id += 1;
        let record = LocalProductRef {
            id: self.next_id,
            fields: fields.clone(),
            last_synced_at: Some(Utc::now()),
        };
        self.products.insert(record.id, record.clone());
        Ok(record)
    }
}

/// Product store and log sink backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a local record directly, bypassing injected failures
    pub async fn seed(&self, fields: ProductFields) -> Result<LocalProductRef, StoreError> {
        self.inner.write().await.insert(&fields)
    }

    /// Reject every create or update whose record is bound to `external_id`
    pub async fn reject_writes_for(&self, external_id: impl Into<String>) {
        self.inner
            .write()
            .await
            .rejected_ids
            .insert(external_id.into());
    }

    /// Make every log append fail
    pub async fn reject_logs(&self, reject: bool) {
        self.inner.write().await.reject_logs = reject;
    }

    /// Snapshot of all products, ordered by id
    pub async fn products(&self) -> Vec<LocalProductRef> {
        self.inner.read().await.products.values().cloned().collect()
    }

    /// Snapshot of all log entries, in append order
    pub async fn entries(&self) -> Vec<SyncLogEntry> {
        self.inner.read().await.logs.clone()
    }

    /// Log entries of one batch
    pub async fn entries_for_batch(&self, batch_id: &str) -> Vec<SyncLogEntry> {
        self.inner
            .read()
            .await
            .logs
            .iter()
            .filter(|e| e.batch_id == batch_id)
            .cloned()
            .collect()
    }

    /// Number of successful create and update calls
    pub async fn write_count(&self) -> u64 {
        self.inner.read().await.writes
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocalProductRef>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .products
            .values()
            .find(|p| p.fields.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Vec<LocalProductRef>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .products
            .values()
            .filter(|p| p.fields.sku.as_deref() == Some(sku))
            .cloned()
            .collect())
    }

    async fn create(&self, fields: &ProductFields) -> Result<LocalProductRef, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_rejected(fields)?;
        let record = inner.insert(fields)?;
        inner.writes += 1;
        Ok(record)
    }

    async fn update(
        &self,
        target: &LocalProductRef,
        diff: &ProductDiff,
    ) -> Result<LocalProductRef, StoreError> {
        let mut inner = self.inner.write().await;

        let mut fields = inner
            .products
            .get(&target.id)
            .map(|p| p.fields.clone())
            .ok_or(StoreError::NotFound)?;
        diff.apply_to(&mut fields);

        inner.check_rejected(&fields)?;
        if let Some(id) = &fields.external_id {
            if inner.external_id_taken(id, Some(target.id)) {
                return Err(StoreError::ConstraintViolation(format!(
                    "external_id {} already exists",
                    id
                )));
            }
        }

        let record = LocalProductRef {
            id: target.id,
            fields,
            last_synced_at: Some(Utc::now()),
        };
        inner.products.insert(record.id, record.clone());
        inner.writes += 1;
        Ok(record)
    }
}

#[async_trait]
impl LogSink for MemoryStore {
    async fn append(&self, entry: &SyncLogEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.reject_logs {
            return Err(StoreError::Rejected("log sink unavailable".to_string()));
        }
        inner.logs.push(entry.clone());
        Ok(())
    }
}
