//! SQLite implementation of the store collaborators
//!
//! This module provides a SQLite-based [`ProductStore`] and [`LogSink`]
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row};
use std::path::Path;
use tokio_rusqlite::Connection;

use super::schema::CREATE_SCHEMA;
use super::{LogSink, LogStatistics, ProductStore};
use crate::error::StoreError;
use crate::models::{LocalProductRef, ProductDiff, ProductFields, SyncLogEntry};

const PRODUCT_COLUMNS: &str =
    "id, external_id, sku, name, price, cost, barcode, category, last_synced_at";

const LOG_COLUMNS: &str = "operation, status, external_id, sku, local_id, message, error_details, \
     request_snapshot, response_snapshot, batch_id, execution_time, retry_count, is_automatic, \
     created_at";

/// SQLite-backed product store and log sink
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file
    ///
    /// Use `:memory:` for an in-memory database.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:").await
    }

    /// Aggregate statistics over all entries, or one batch
    pub async fn log_statistics(
        &self,
        batch_id: Option<&str>,
    ) -> Result<LogStatistics, StoreError> {
        let batch_id = batch_id.map(str::to_string);

        let mut stats = self
            .conn
            .call(move |conn| {
                let stats = conn.query_row(
                    r#"
                    SELECT COUNT(*),
                           COALESCE(SUM(status = 'success'), 0),
                           COALESCE(SUM(status = 'error'), 0),
                           COALESCE(SUM(status = 'warning'), 0),
                           COALESCE(SUM(operation = 'create'), 0),
                           COALESCE(SUM(operation = 'update'), 0),
                           COALESCE(SUM(operation = 'skip'), 0),
                           COALESCE(SUM(execution_time), 0.0)
                    FROM sync_logs
                    WHERE ?1 IS NULL OR batch_id = ?1
                    "#,
                    [&batch_id],
                    |row| {
                        Ok(LogStatistics {
                            total: row.get::<_, i64>(0)? as u64,
                            success: row.get::<_, i64>(1)? as u64,
                            errors: row.get::<_, i64>(2)? as u64,
                            warnings: row.get::<_, i64>(3)? as u64,
                            created: row.get::<_, i64>(4)? as u64,
                            updated: row.get::<_, i64>(5)? as u64,
                            skipped: row.get::<_, i64>(6)? as u64,
                            total_execution_time: row.get(7)?,
                            ..LogStatistics::default()
                        })
                    },
                )?;
                Ok(stats)
            })
            .await?;

        stats.finish();
        Ok(stats)
    }

    /// Most recent error entries, newest first
    pub async fn recent_errors(&self, limit: u32) -> Result<Vec<SyncLogEntry>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sync_logs WHERE status = 'error' \
                     ORDER BY created_at DESC, id DESC LIMIT ?1",
                    LOG_COLUMNS
                ))?;

                let entries = stmt
                    .query_map([limit as i64], row_to_log_entry)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    /// Every entry of one batch, in append order
    pub async fn entries_for_batch(&self, batch_id: &str) -> Result<Vec<SyncLogEntry>, StoreError> {
        let batch_id = batch_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sync_logs WHERE batch_id = ?1 ORDER BY id",
                    LOG_COLUMNS
                ))?;

                let entries = stmt
                    .query_map([&batch_id], row_to_log_entry)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    /// Delete entries older than `older_than_days`, keeping error entries
    ///
    /// Returns the number of deleted entries
    pub async fn prune_logs(&self, older_than_days: u32) -> Result<u64, StoreError> {
        let cutoff = format_datetime(Utc::now() - chrono::Duration::days(older_than_days as i64));

        self.conn
            .call(move |conn| {
                let count = conn.execute(
                    "DELETE FROM sync_logs WHERE created_at < ?1 AND status != 'error'",
                    [&cutoff],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }

    /// Number of stored products
    pub async fn product_count(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |row| {
                    row.get(0)
                })?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl ProductStore for SqliteStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocalProductRef>, StoreError> {
        let external_id = external_id.to_string();

        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM products WHERE external_id = ?1",
                            PRODUCT_COLUMNS
                        ),
                        [&external_id],
                        row_to_product,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Vec<LocalProductRef>, StoreError> {
        let sku = sku.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM products WHERE sku = ?1 ORDER BY id",
                    PRODUCT_COLUMNS
                ))?;

                let products = stmt
                    .query_map([&sku], row_to_product)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(products)
            })
            .await
            .map_err(Into::into)
    }

    async fn create(&self, fields: &ProductFields) -> Result<LocalProductRef, StoreError> {
        let fields = fields.clone();
        let synced_at = Utc::now();
        let synced_at_str = format_datetime(synced_at);

        let (id, fields) = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO products
                    (external_id, sku, name, price, cost, barcode, category, last_synced_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    rusqlite::params![
                        fields.external_id,
                        fields.sku,
                        fields.name,
                        fields.price,
                        fields.cost,
                        fields.barcode,
                        fields.category,
                        synced_at_str
                    ],
                )?;
                Ok((conn.last_insert_rowid(), fields))
            })
            .await?;

        Ok(LocalProductRef {
            id,
            fields,
            last_synced_at: Some(synced_at),
        })
    }

    async fn update(
        &self,
        target: &LocalProductRef,
        diff: &ProductDiff,
    ) -> Result<LocalProductRef, StoreError> {
        let id = target.id;
        let diff = diff.clone();
        let synced_at = Utc::now();
        let synced_at_str = format_datetime(synced_at);

        let updated = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let current = tx
                    .query_row(
                        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS),
                        [id],
                        row_to_product,
                    )
                    .optional()?;
                let Some(mut record) = current else {
                    return Ok(None);
                };

                diff.apply_to(&mut record.fields);
                let fields = &record.fields;
                tx.execute(
                    r#"
                    UPDATE products
                    SET external_id = ?1, sku = ?2, name = ?3, price = ?4, cost = ?5,
                        barcode = ?6, category = ?7, last_synced_at = ?8
                    WHERE id = ?9
                    "#,
                    rusqlite::params![
                        fields.external_id,
                        fields.sku,
                        fields.name,
                        fields.price,
                        fields.cost,
                        fields.barcode,
                        fields.category,
                        synced_at_str,
                        id
                    ],
                )?;
                tx.commit()?;

                record.last_synced_at = Some(synced_at);
                Ok(Some(record))
            })
            .await?;

        updated.ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl LogSink for SqliteStore {
    async fn append(&self, entry: &SyncLogEntry) -> Result<(), StoreError> {
        let operation = entry.operation.to_string();
        let status = entry.status.to_string();
        let external_id = entry.external_id.clone();
        let sku = entry.sku.clone();
        let local_id = entry.local_id;
        let message = entry.message.clone();
        let error_details = entry.error_details.clone();
        let request_snapshot = entry
            .request_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let response_snapshot = entry
            .response_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let batch_id = entry.batch_id.clone();
        let execution_time = entry.execution_time;
        let retry_count = entry.retry_count as i64;
        let is_automatic = entry.is_automatic;
        let created_at = format_datetime(entry.created_at);

        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO sync_logs ({}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                        LOG_COLUMNS
                    ),
                    rusqlite::params![
                        operation,
                        status,
                        external_id,
                        sku,
                        local_id,
                        message,
                        error_details,
                        request_snapshot,
                        response_snapshot,
                        batch_id,
                        execution_time,
                        retry_count,
                        is_automatic,
                        created_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }
}

fn row_to_product(row: &Row<'_>) -> rusqlite::Result<LocalProductRef> {
    Ok(LocalProductRef {
        id: row.get(0)?,
        fields: ProductFields {
            external_id: row.get(1)?,
            sku: row.get(2)?,
            name: row.get(3)?,
            price: row.get(4)?,
            cost: row.get(5)?,
            barcode: row.get(6)?,
            category: row.get(7)?,
        },
        last_synced_at: parse_datetime(row.get::<_, Option<String>>(8)?),
    })
}

fn row_to_log_entry(row: &Row<'_>) -> rusqlite::Result<SyncLogEntry> {
    Ok(SyncLogEntry {
        operation: parse_text_column(row, 0)?,
        status: parse_text_column(row, 1)?,
        external_id: row.get(2)?,
        sku: row.get(3)?,
        local_id: row.get(4)?,
        message: row.get(5)?,
        error_details: row.get(6)?,
        request_snapshot: parse_json(row.get::<_, Option<String>>(7)?),
        response_snapshot: parse_json(row.get::<_, Option<String>>(8)?),
        batch_id: row.get(9)?,
        execution_time: row.get(10)?,
        retry_count: row.get::<_, i64>(11)? as u32,
        is_automatic: row.get(12)?,
        created_at: parse_datetime(row.get::<_, Option<String>>(13)?).unwrap_or_else(Utc::now),
    })
}

fn parse_text_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_json(s: Option<String>) -> Option<serde_json::Value> {
    s.and_then(|s| serde_json::from_str(&s).ok())
}

/// Timestamps are stored as fixed-width UTC RFC 3339 so they sort as text
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse datetime string from SQLite
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
