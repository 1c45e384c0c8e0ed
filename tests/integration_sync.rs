//! End-to-end synchronization tests
//!
//! Tests full runs against a mock catalog API including:
//! - Idempotent create then skip
//! - Update detection
//! - Abort on an unreachable API
//! - Dry-run parity
//! - SQLite-backed runs and scheduler-triggered runs

mod common;

use std::sync::Arc;
use std::time::Duration;

use product_sync::models::{LogOperation, LogStatus, ProductFields, RunStatus};
use product_sync::store::{MemoryStore, SqliteStore};
use product_sync::sync::{RunOptions, SchedulerConfig, SyncJob, SyncScheduler};
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{catalog, product, start_catalog, test_orchestrator};

/// Test 1: A fresh catalog is created, then a second run skips everything
#[tokio::test]
async fn test_create_then_skip() {
    let (server, _catalog) = start_catalog(catalog(10)).await;
    let store = Arc::new(MemoryStore::new());
    let orchestrator = test_orchestrator(&server.uri(), store.clone(), 4);

    let first = orchestrator.run(RunOptions::new()).await;
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.total, 10);
    assert_eq!(first.created, 10);
    assert_eq!(first.errors, 0);

    let second = orchestrator.run(RunOptions::new()).await;
    assert_eq!(second.total, 10);
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 10);
    assert_ne!(first.batch_id, second.batch_id);

    assert_eq!(store.products().await.len(), 10);
    let entries = store.entries_for_batch(&second.batch_id).await;
    assert_eq!(entries.len(), 10);
    assert!(entries.iter().all(|e| e.operation == LogOperation::Skip));
}

/// Test 2: A single price change updates one record and skips the rest
#[tokio::test]
async fn test_price_change_updates_one() {
    let (server, catalog) = start_catalog(catalog(10)).await;
    let store = Arc::new(MemoryStore::new());
    let orchestrator = test_orchestrator(&server.uri(), store.clone(), 100);

    orchestrator.run(RunOptions::new()).await;
    catalog.set_field(3, "list_price", json!(99.5));

    let result = orchestrator.run(RunOptions::new()).await;
    assert_eq!(result.updated, 1);
    assert_eq!(result.skipped, 9);
    assert_eq!(result.created, 0);

    let products = store.products().await;
    let updated = products
        .iter()
        .find(|p| p.fields.external_id.as_deref() == Some("3"))
        .unwrap();
    assert_eq!(updated.fields.price, 99.5);

    let entries = store.entries_for_batch(&result.batch_id).await;
    let update = entries
        .iter()
        .find(|e| e.operation == LogOperation::Update)
        .unwrap();
    assert_eq!(update.external_id.as_deref(), Some("3"));
    assert_eq!(update.local_id, Some(updated.id));
}

/// Test 3: An API that keeps failing aborts the run with one batch-level entry
#[tokio::test]
async fn test_unreachable_api_aborts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let orchestrator = test_orchestrator(&server.uri(), store.clone(), 100);

    let result = orchestrator.run(RunOptions::new()).await;
    assert_eq!(result.status, RunStatus::Aborted);
    assert_eq!(result.errors, 1);
    assert_eq!(result.total, 0);

    let entries = store.entries_for_batch(&result.batch_id).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, LogStatus::Error);
    assert!(entries[0].external_id.is_none());
    assert_eq!(entries[0].retry_count, 2);

    // One initial attempt plus two retries
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    assert!(store.products().await.is_empty());
}

/// Test 4: A dry run reports the same counters as a real run and writes nothing
#[tokio::test]
async fn test_dry_run_parity() {
    let mut items = catalog(6);
    // Two remote records claiming the same new SKU
    items.push(product(7, "SKU-DUP", 5.0));
    items.push(product(8, "SKU-DUP", 6.0));
    let (server, _catalog) = start_catalog(items).await;

    let dry_store = Arc::new(MemoryStore::new());
    let dry = test_orchestrator(&server.uri(), dry_store.clone(), 3)
        .run(RunOptions::new().with_dry_run(true))
        .await;

    let real_store = Arc::new(MemoryStore::new());
    let real = test_orchestrator(&server.uri(), real_store.clone(), 3)
        .run(RunOptions::new())
        .await;

    assert!(dry.dry_run);
    assert_eq!(dry.counters(), real.counters());
    assert_eq!(dry.created, 7);
    assert_eq!(dry.errors, 1);

    assert_eq!(dry_store.write_count().await, 0);
    assert!(dry_store.products().await.is_empty());
    let entries = dry_store.entries_for_batch(&dry.batch_id).await;
    assert_eq!(entries.len(), 8);
    assert!(entries.iter().all(|e| e.message.starts_with("[DRY RUN]")));
}

/// Test 5: Repeated runs never duplicate local records
#[tokio::test]
async fn test_no_duplicates_after_repeated_runs() {
    let (server, catalog) = start_catalog(catalog(5)).await;
    let store = Arc::new(MemoryStore::new());
    let orchestrator = test_orchestrator(&server.uri(), store.clone(), 2);

    for _ in 0..3 {
        orchestrator.run(RunOptions::new()).await;
    }
    catalog.push(product(6, "SKU-006", 60.0));
    let result = orchestrator.run(RunOptions::new()).await;

    assert_eq!(result.created, 1);
    assert_eq!(result.skipped, 5);

    let products = store.products().await;
    assert_eq!(products.len(), 6);
    let mut ids: Vec<_> = products
        .iter()
        .filter_map(|p| p.fields.external_id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
}

/// Test 6: A local record without external id is adopted through its SKU
#[tokio::test]
async fn test_sku_fallback_binds_local_record() {
    let (server, _catalog) = start_catalog(vec![product(42, "LEGACY-1", 12.0)]).await;
    let store = Arc::new(MemoryStore::new());
    let legacy = store
        .seed(ProductFields::new("Product 42", 12.0).with_sku("LEGACY-1"))
        .await
        .unwrap();

    let orchestrator = test_orchestrator(&server.uri(), store.clone(), 10);
    let first = orchestrator.run(RunOptions::new()).await;
    assert_eq!(first.updated, 1);
    assert_eq!(first.created, 0);

    let products = store.products().await;
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].id, legacy.id);
    assert_eq!(products[0].fields.external_id.as_deref(), Some("42"));

    let second = orchestrator.run(RunOptions::new()).await;
    assert_eq!(second.skipped, 1);
}

/// Test 7: Full runs against the SQLite store persist products and logs
#[tokio::test]
async fn test_sqlite_end_to_end() {
    let (server, catalog) = start_catalog(catalog(10)).await;
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let orchestrator = test_orchestrator(&server.uri(), store.clone(), 4);

    let first = orchestrator.run(RunOptions::new()).await;
    assert_eq!(first.created, 10);
    assert_eq!(store.product_count().await.unwrap(), 10);

    let stats = store.log_statistics(Some(&first.batch_id)).await.unwrap();
    assert_eq!(stats.total, 10);
    assert_eq!(stats.created, 10);
    assert_eq!(stats.errors, 0);

    catalog.set_field(7, "name", json!("Renamed"));
    let second = orchestrator.run(RunOptions::new()).await;
    assert_eq!(second.updated, 1);
    assert_eq!(second.skipped, 9);
    assert_eq!(store.product_count().await.unwrap(), 10);

    let entries = store.entries_for_batch(&second.batch_id).await.unwrap();
    assert_eq!(entries.len(), 10);
    assert!(store.recent_errors(10).await.unwrap().is_empty());
}

/// Test 8: A manual trigger through the scheduler runs the real orchestrator
#[tokio::test]
async fn test_scheduler_manual_trigger() {
    let (server, _catalog) = start_catalog(catalog(3)).await;
    let store = Arc::new(MemoryStore::new());
    let job: Arc<dyn SyncJob> = Arc::new(test_orchestrator(&server.uri(), store.clone(), 10));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = SyncScheduler::new(
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            initial_delay: Duration::from_secs(3600),
            jitter_secs: 0,
        },
        job,
        shutdown_rx,
    );
    let manual = scheduler.manual_sync_handle();
    let status = scheduler.status_handle();
    let handle = tokio::spawn(scheduler.run());

    let result = manual
        .trigger_sync(RunOptions::new().with_batch_id("manual-1"))
        .await
        .unwrap();
    assert_eq!(result.batch_id, "manual-1");
    assert_eq!(result.created, 3);
    assert_eq!(status.read().await.runs, 1);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.products().await.len(), 3);
}

/// Test 9: Dry runs follow SKU moves made by earlier updates in the batch
#[tokio::test]
async fn test_dry_run_parity_with_sku_moves() {
    let (server, catalog) = start_catalog(catalog(4)).await;
    catalog.set_field(1, "sku", json!("SKU-NEW"));
    catalog.set_field(3, "sku", json!("SKU-001"));
    catalog.set_field(4, "sku", json!("SKU-NEW"));

    let seeded = || async {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                ProductFields::new("Product 1", 10.0)
                    .with_external_id("1")
                    .with_sku("SKU-001"),
            )
            .await
            .unwrap();
        store
    };

    let dry_store = seeded().await;
    let dry = test_orchestrator(&server.uri(), dry_store.clone(), 1)
        .run(RunOptions::new().with_dry_run(true))
        .await;
    let real = test_orchestrator(&server.uri(), seeded().await, 1)
        .run(RunOptions::new())
        .await;

    assert_eq!(real.total, 4);
    assert_eq!(real.updated, 1);
    assert_eq!(real.created, 2);
    assert_eq!(real.errors, 1);
    assert_eq!(dry.counters(), real.counters());
    assert_eq!(dry_store.write_count().await, 0);
}
