//! Reconciliation of remote records against the local product store
//!
//! A remote record is matched by external id first and by SKU second. SKU
//! matches are refused whenever they are ambiguous: several local records
//! share the SKU, the match is already bound to another remote id, or
//! another remote record of the same run claimed it or its SKU first.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::ReconcileError;
use crate::models::{ExternalProduct, LocalProductRef, OutcomeKind, ProductDiff, ProductFields};
use crate::store::ProductStore;

/// What to do with one remote record
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No local match; persist the full field set
    Create {
        /// Fields to persist
        fields: ProductFields,
    },
    /// Local match with differing fields
    Update {
        /// Matched local record
        target: LocalProductRef,
        /// Changes to apply
        diff: ProductDiff,
    },
    /// Local match already current
    Skip {
        /// Matched local record
        target: LocalProductRef,
    },
}

impl Decision {
    /// Outcome classification of the decision
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Decision::Create { .. } => OutcomeKind::Created,
            Decision::Update { .. } => OutcomeKind::Updated,
            Decision::Skip { .. } => OutcomeKind::Skipped,
        }
    }

    /// Local record the decision refers to, if any
    pub fn local_id(&self) -> Option<i64> {
        match self {
            Decision::Create { .. } => None,
            Decision::Update { target, .. } | Decision::Skip { target } => Some(target.id),
        }
    }
}

/// Per-run reconciliation state
///
/// Create one engine per run. It remembers which remote ids it has seen,
/// which local records were claimed through the SKU fallback, which SKUs
/// belong to records planned for creation, and the projected state of every
/// record planned for update. Store lookups are read through that projection
/// so that a run decides the same way whether or not writes reach the store.
#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    seen_ids: HashSet<String>,
    claims: HashMap<i64, String>,
    planned_skus: HashMap<String, String>,
    planned_updates: HashMap<i64, LocalProductRef>,
}

impl ReconciliationEngine {
    /// Create an engine with empty run state
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide the operation for one remote record
    pub async fn reconcile<S>(
        &mut self,
        product: &ExternalProduct,
        store: &S,
    ) -> Result<Decision, ReconcileError>
    where
        S: ProductStore + ?Sized,
    {
        let external_id = product.external_id.as_str();
        if !self.seen_ids.insert(external_id.to_string()) {
            return Err(ReconcileError::DuplicateExternalId(external_id.to_string()));
        }

        let remote = product.fields();

        if let Some(found) = store.find_by_external_id(external_id).await? {
            let target = self.project(found);
            debug!(external_id, local_id = target.id, "Matched by external id");
            return Ok(self.compare(target, &remote));
        }

        let Some(sku) = product.sku.as_deref() else {
            return Ok(Decision::Create { fields: remote });
        };

        if let Some(claimed_by) = self.planned_skus.get(sku) {
            return Err(ReconcileError::SkuCollision {
                sku: sku.to_string(),
                claimed_by: claimed_by.clone(),
            });
        }

        let mut candidates = self.sku_candidates(sku, store).await?;
        if candidates.len() > 1 {
            return Err(ReconcileError::AmbiguousSku {
                sku: sku.to_string(),
                local_ids: candidates.iter().map(|c| c.id).collect(),
            });
        }

        match candidates.pop() {
            Some(target) => {
                if let Some(claimed_by) = self.claims.get(&target.id) {
                    return Err(ReconcileError::SkuCollision {
                        sku: sku.to_string(),
                        claimed_by: claimed_by.clone(),
                    });
                }
                if let Some(bound_to) = &target.fields.external_id {
                    return Err(ReconcileError::SkuBoundElsewhere {
                        sku: sku.to_string(),
                        local_id: target.id,
                        bound_to: bound_to.clone(),
                    });
                }

                debug!(external_id, sku, local_id = target.id, "Matched by SKU fallback");
                self.claims.insert(target.id, external_id.to_string());
                Ok(self.compare(target, &remote))
            }
            None => {
                self.planned_skus
                    .insert(sku.to_string(), external_id.to_string());
                Ok(Decision::Create { fields: remote })
            }
        }
    }

    /// Forget a planned create whose write failed
    pub fn release_create(&mut self, fields: &ProductFields) {
        if let (Some(sku), Some(external_id)) = (&fields.sku, &fields.external_id) {
            if self.planned_skus.get(sku) == Some(external_id) {
                self.planned_skus.remove(sku);
            }
        }
    }

    /// Forget a planned update, and any SKU claim on it, after its write failed
    pub fn release_update(&mut self, local_id: i64) {
        self.planned_updates.remove(&local_id);
        self.claims.remove(&local_id);
    }

    /// Local records carrying `sku` once this run's planned updates apply
    async fn sku_candidates<S>(
        &self,
        sku: &str,
        store: &S,
    ) -> Result<Vec<LocalProductRef>, ReconcileError>
    where
        S: ProductStore + ?Sized,
    {
        let mut candidates: Vec<LocalProductRef> = store
            .find_by_sku(sku)
            .await?
            .into_iter()
            .map(|found| self.project(found))
            .filter(|c| c.fields.sku.as_deref() == Some(sku))
            .collect();

        for planned in self.planned_updates.values() {
            if planned.fields.sku.as_deref() == Some(sku)
                && !candidates.iter().any(|c| c.id == planned.id)
            {
                candidates.push(planned.clone());
            }
        }
        candidates.sort_by_key(|c| c.id);
        Ok(candidates)
    }

    fn project(&self, found: LocalProductRef) -> LocalProductRef {
        match self.planned_updates.get(&found.id) {
            Some(planned) => planned.clone(),
            None => found,
        }
    }

    fn compare(&mut self, target: LocalProductRef, remote: &ProductFields) -> Decision {
        let diff = ProductDiff::between(&target.fields, remote);
        if diff.is_empty() {
            return Decision::Skip { target };
        }

        let mut projected = target.clone();
        diff.apply_to(&mut projected.fields);
        self.planned_updates.insert(projected.id, projected);
        Decision::Update { target, diff }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::ProductField;
    use crate::store::{MemoryStore, MockProductStore};
    use serde_json::json;

    fn product(id: u64, sku: Option<&str>, price: f64) -> ExternalProduct {
        let mut payload = json!({
            "id": id,
            "name": format!("Product {}", id),
            "list_price": price,
        });
        if let Some(sku) = sku {
            payload["sku"] = json!(sku);
        }
        ExternalProduct::from_payload(payload).unwrap()
    }

    // Test 1: Unknown record without SKU is created
    #[tokio::test]
    async fn test_create_without_sku() {
        let store = MemoryStore::new();
        let mut engine = ReconciliationEngine::new();

        let decision = engine.reconcile(&product(1, None, 10.0), &store).await.unwrap();

        assert_eq!(decision.kind(), OutcomeKind::Created);
        assert_eq!(decision.local_id(), None);
    }

    // Test 2: External id match with equal fields is skipped
    #[tokio::test]
    async fn test_skip_when_unchanged() {
        let store = MemoryStore::new();
        let remote = product(1, Some("A-1"), 10.0);
        store.seed(remote.fields()).await.unwrap();

        let mut engine = ReconciliationEngine::new();
        let decision = engine.reconcile(&remote, &store).await.unwrap();

        assert!(matches!(decision, Decision::Skip { .. }));
    }

    // Test 3: External id match with a changed price is updated
    #[tokio::test]
    async fn test_update_when_changed() {
        let store = MemoryStore::new();
        store
            .seed(product(1, Some("A-1"), 10.0).fields())
            .await
            .unwrap();

        let mut engine = ReconciliationEngine::new();
        let decision = engine
            .reconcile(&product(1, Some("A-1"), 12.5), &store)
            .await
            .unwrap();

        match decision {
            Decision::Update { diff, .. } => {
                assert_eq!(diff.len(), 1);
                assert!(diff.contains(ProductField::Price));
            }
            other => panic!("Expected update, got {:?}", other),
        }
    }

    // Test 4: SKU fallback binds an unbound local record
    #[tokio::test]
    async fn test_sku_fallback_binds_external_id() {
        let store = MemoryStore::new();
        let local = store
            .seed(ProductFields::new("Product 1", 10.0).with_sku("A-1"))
            .await
            .unwrap();

        let mut engine = ReconciliationEngine::new();
        let decision = engine
            .reconcile(&product(1, Some("A-1"), 10.0), &store)
            .await
            .unwrap();

        match decision {
            Decision::Update { target, diff } => {
                assert_eq!(target.id, local.id);
                assert_eq!(diff.field_names(), vec!["external_id"]);
            }
            other => panic!("Expected update, got {:?}", other),
        }
    }

    // Test 5: Id match wins and the SKU lookup is never consulted
    #[tokio::test]
    async fn test_external_id_precedence() {
        let mut store = MockProductStore::new();
        store.expect_find_by_external_id().returning(|id| {
            Ok(Some(LocalProductRef {
                id: 7,
                fields: ProductFields::new("Product 1", 10.0)
                    .with_external_id(id)
                    .with_sku("A-1"),
                last_synced_at: None,
            }))
        });
        store.expect_find_by_sku().never();

        let mut engine = ReconciliationEngine::new();
        let decision = engine
            .reconcile(&product(1, Some("A-1"), 10.0), &store)
            .await
            .unwrap();

        assert_eq!(decision.local_id(), Some(7));
        assert_eq!(decision.kind(), OutcomeKind::Skipped);
    }

    // Test 6: Several local records sharing the SKU is ambiguous
    #[tokio::test]
    async fn test_ambiguous_sku() {
        let store = MemoryStore::new();
        store
            .seed(ProductFields::new("One", 1.0).with_sku("DUP"))
            .await
            .unwrap();
        store
            .seed(ProductFields::new("Two", 2.0).with_sku("DUP"))
            .await
            .unwrap();

        let mut engine = ReconciliationEngine::new();
        let err = engine
            .reconcile(&product(1, Some("DUP"), 1.0), &store)
            .await
            .unwrap_err();

        match err {
            ReconcileError::AmbiguousSku { sku, local_ids } => {
                assert_eq!(sku, "DUP");
                assert_eq!(local_ids.len(), 2);
            }
            other => panic!("Expected AmbiguousSku, got {:?}", other),
        }
    }

    // Test 7: SKU match bound to another remote id is refused
    #[tokio::test]
    async fn test_sku_bound_elsewhere() {
        let store = MemoryStore::new();
        store
            .seed(
                ProductFields::new("Other", 1.0)
                    .with_external_id("99")
                    .with_sku("A-1"),
            )
            .await
            .unwrap();

        let mut engine = ReconciliationEngine::new();
        let err = engine
            .reconcile(&product(1, Some("A-1"), 1.0), &store)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::SkuBoundElsewhere { ref bound_to, .. } if bound_to == "99"
        ));
    }

    // Test 8: Two remote records claiming one local record collide
    #[tokio::test]
    async fn test_sku_collision_within_run() {
        let store = MemoryStore::new();
        store
            .seed(ProductFields::new("Shared", 1.0).with_sku("A-1"))
            .await
            .unwrap();

        let mut engine = ReconciliationEngine::new();
        engine
            .reconcile(&product(1, Some("A-1"), 1.0), &store)
            .await
            .unwrap();
        let err = engine
            .reconcile(&product(2, Some("A-1"), 1.0), &store)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::SkuCollision { ref claimed_by, .. } if claimed_by == "1"
        ));
    }

    // Test 9: Two new records with one SKU collide without any store writes
    #[tokio::test]
    async fn test_planned_sku_collision() {
        let store = MemoryStore::new();
        let mut engine = ReconciliationEngine::new();

        let first = engine
            .reconcile(&product(1, Some("NEW"), 1.0), &store)
            .await
            .unwrap();
        assert_eq!(first.kind(), OutcomeKind::Created);

        let err = engine
            .reconcile(&product(2, Some("NEW"), 1.0), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::SkuCollision { .. }));
    }

    // Test 10: The same external id twice in one run is refused
    #[tokio::test]
    async fn test_duplicate_external_id() {
        let store = MemoryStore::new();
        let mut engine = ReconciliationEngine::new();

        engine.reconcile(&product(1, None, 1.0), &store).await.unwrap();
        let err = engine
            .reconcile(&product(1, None, 1.0), &store)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::DuplicateExternalId(ref id) if id == "1"));
    }

    // Test 11: Store lookup failures surface as Lookup errors
    #[tokio::test]
    async fn test_lookup_failure() {
        let mut store = MockProductStore::new();
        store
            .expect_find_by_external_id()
            .returning(|_| Err(StoreError::Connection("closed".to_string())));

        let mut engine = ReconciliationEngine::new();
        let err = engine
            .reconcile(&product(1, None, 1.0), &store)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Lookup(_)));
        assert!(!err.is_ambiguity());
    }
    // Test 12: Planned SKU changes are visible to later lookups without writes
    #[tokio::test]
    async fn test_planned_update_moves_sku() {
        let store = MemoryStore::new();
        let local = store
            .seed(
                ProductFields::new("Product 5", 5.0)
                    .with_external_id("5")
                    .with_sku("OLD"),
            )
            .await
            .unwrap();

        let mut engine = ReconciliationEngine::new();
        let moved = engine
            .reconcile(&product(5, Some("NEW"), 5.0), &store)
            .await
            .unwrap();
        assert_eq!(moved.kind(), OutcomeKind::Updated);

        let freed = engine
            .reconcile(&product(9, Some("OLD"), 9.0), &store)
            .await
            .unwrap();
        assert_eq!(freed.kind(), OutcomeKind::Created);

        let err = engine
            .reconcile(&product(10, Some("NEW"), 1.0), &store)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::SkuBoundElsewhere { local_id, ref bound_to, .. }
                if local_id == local.id && bound_to == "5"
        ));
        assert_eq!(store.write_count().await, 0);
    }

    // Test 13: Releasing a failed create frees its SKU
    #[tokio::test]
    async fn test_release_create() {
        let store = MemoryStore::new();
        let mut engine = ReconciliationEngine::new();

        let first = engine
            .reconcile(&product(1, Some("S"), 1.0), &store)
            .await
            .unwrap();
        let Decision::Create { fields } = first else {
            panic!("Expected create");
        };
        engine.release_create(&fields);

        let second = engine
            .reconcile(&product(2, Some("S"), 1.0), &store)
            .await
            .unwrap();
        assert_eq!(second.kind(), OutcomeKind::Created);
    }

    // Test 14: Releasing a failed update frees the claimed local record
    #[tokio::test]
    async fn test_release_update() {
        let store = MemoryStore::new();
        let local = store
            .seed(ProductFields::new("Shared", 1.0).with_sku("A-1"))
            .await
            .unwrap();

        let mut engine = ReconciliationEngine::new();
        let first = engine
            .reconcile(&product(1, Some("A-1"), 1.0), &store)
            .await
            .unwrap();
        assert_eq!(first.local_id(), Some(local.id));
        engine.release_update(local.id);

        let second = engine
            .reconcile(&product(2, Some("A-1"), 1.0), &store)
            .await
            .unwrap();
        assert_eq!(second.local_id(), Some(local.id));
    }
}
