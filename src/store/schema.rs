//! SQLite schema for product-sync
//!
//! Tables are created idempotently when a store is opened.

/// SQL statement to create the database schema
pub const CREATE_SCHEMA: &str = r#"
-- Local products table
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT UNIQUE,
    sku TEXT,
    name TEXT NOT NULL,
    price REAL NOT NULL,
    cost REAL,
    barcode TEXT,
    category TEXT,
    last_synced_at DATETIME,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_products_sku ON products(sku);

-- Sync audit log table
CREATE TABLE IF NOT EXISTS sync_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL,
    status TEXT NOT NULL,
    external_id TEXT,
    sku TEXT,
    local_id INTEGER,
    message TEXT NOT NULL,
    error_details TEXT,
    request_snapshot TEXT,
    response_snapshot TEXT,
    batch_id TEXT NOT NULL,
    execution_time REAL NOT NULL DEFAULT 0,
    retry_count INTEGER NOT NULL DEFAULT 0,
    is_automatic INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_logs_batch ON sync_logs(batch_id);
CREATE INDEX IF NOT EXISTS idx_sync_logs_created ON sync_logs(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_sync_logs_status ON sync_logs(status);
"#;
