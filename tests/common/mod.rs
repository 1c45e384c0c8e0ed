//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use product_sync::config::{ApiConfig, RetryConfig};
use product_sync::store::{LogSink, ProductStore};
use product_sync::sync::{ApiClient, RateLimiter, SyncOrchestrator};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Build a catalog record in the remote wire format
pub fn product(id: u64, sku: &str, price: f64) -> Value {
    json!({
        "id": id,
        "name": format!("Product {}", id),
        "sku": sku,
        "list_price": price,
        "standard_price": price / 2.0,
        "barcode": format!("40000000{:05}", id),
        "category": "General",
    })
}

/// `count` records with ids starting at 1
pub fn catalog(count: u64) -> Vec<Value> {
    (1..=count)
        .map(|id| product(id, &format!("SKU-{:03}", id), 10.0 * id as f64))
        .collect()
}

/// Serves `/products` pages out of a mutable in-memory catalog
#[derive(Clone, Default)]
pub struct CatalogResponder {
    items: Arc<Mutex<Vec<Value>>>,
}

impl CatalogResponder {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: Arc::new(Mutex::new(items)),
        }
    }

    /// Replace a field of the record with the given id
    pub fn set_field(&self, id: u64, field: &str, value: Value) {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.iter_mut().find(|item| item["id"] == json!(id)) {
            item[field] = value;
        }
    }

    /// Append a record
    pub fn push(&self, item: Value) {
        self.items.lock().unwrap().push(item);
    }
}

impl Respond for CatalogResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut offset = 0usize;
        let mut limit = usize::MAX;
        for (key, value) in request.url.query_pairs() {
            match key.as_ref() {
                "offset" => offset = value.parse().unwrap_or(0),
                "limit" => limit = value.parse().unwrap_or(usize::MAX),
                _ => {}
            }
        }

        let items = self.items.lock().unwrap();
        let page: Vec<Value> = items.iter().skip(offset).take(limit).cloned().collect();
        ResponseTemplate::new(200).set_body_json(json!({
            "items": page,
            "total": items.len(),
            "offset": offset,
            "limit": limit,
        }))
    }
}

/// Start a mock catalog API serving the given records
pub async fn start_catalog(items: Vec<Value>) -> (MockServer, CatalogResponder) {
    let server = MockServer::start().await;
    let responder = CatalogResponder::new(items);
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(responder.clone())
        .mount(&server)
        .await;
    (server, responder)
}

/// Client with immediate retries and a generous rate limit
pub fn test_client(base_url: &str, max_retries: u32) -> ApiClient {
    ApiClient::new(
        &ApiConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            max_retries,
            ..ApiConfig::default()
        },
        &RetryConfig {
            base_delay_secs: 0,
            max_delay_secs: 0,
            backoff_multiplier: 2.0,
            jitter: false,
        },
        Arc::new(RateLimiter::per_second(1000.0)),
    )
    .expect("Failed to build test client")
}

/// Orchestrator whose store also acts as its log sink
pub fn test_orchestrator<S>(base_url: &str, store: Arc<S>, page_size: usize) -> SyncOrchestrator<S, S>
where
    S: ProductStore + LogSink,
{
    SyncOrchestrator::new(test_client(base_url, 2), Arc::clone(&store), store)
        .with_page_size(page_size)
}
