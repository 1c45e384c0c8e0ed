//! Product domain models
//!
//! This module defines the remote product record, the comparable field set
//! persisted locally, and the field-level diff between the two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// Tolerance used when comparing monetary amounts
const AMOUNT_EPSILON: f64 = 1e-9;

/// A product record fetched from the remote catalog
///
/// Immutable once fetched; `raw_payload` keeps the source record for audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalProduct {
    /// Remote-unique identifier
    pub external_id: String,

    /// Remote-unique SKU, if the remote record carries one
    pub sku: Option<String>,

    /// Display name
    pub name: String,

    /// Sale price
    pub price: f64,

    /// Cost price
    pub cost: Option<f64>,

    /// Barcode
    pub barcode: Option<String>,

    /// Category name
    pub category: Option<String>,

    /// Opaque copy of the source record
    pub raw_payload: Value,
}

impl ExternalProduct {
    /// Decode a remote record
    ///
    /// Accepts numeric or string ids and the `list_price` / `standard_price`
    /// aliases used by the catalog API. Empty strings count as absent.
    pub fn from_payload(payload: Value) -> Result<Self, SyncError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| SyncError::InvalidRecord("record is not a JSON object".to_string()))?;

        let external_id = text_field(obj, &["external_id", "id"])
            .ok_or_else(|| SyncError::InvalidRecord("missing id".to_string()))?;
        let name = text_field(obj, &["name"]).ok_or_else(|| {
            SyncError::InvalidRecord(format!("record {} is missing a name", external_id))
        })?;
        let price = amount_field(obj, &["price", "list_price"])
            .map_err(|e| SyncError::InvalidRecord(format!("record {}: {}", external_id, e)))?
            .ok_or_else(|| {
                SyncError::InvalidRecord(format!("record {} is missing a price", external_id))
            })?;
        let cost = amount_field(obj, &["cost", "standard_price"])
            .map_err(|e| SyncError::InvalidRecord(format!("record {}: {}", external_id, e)))?;

        Ok(Self {
            sku: text_field(obj, &["sku"]),
            barcode: text_field(obj, &["barcode"]),
            category: text_field(obj, &["category"]),
            external_id,
            name,
            price,
            cost,
            raw_payload: payload,
        })
    }

    /// The comparable field set this record should persist as
    pub fn fields(&self) -> ProductFields {
        ProductFields {
            external_id: Some(self.external_id.clone()),
            sku: self.sku.clone(),
            name: self.name.clone(),
            price: self.price,
            cost: self.cost,
            barcode: self.barcode.clone(),
            category: self.category.clone(),
        }
    }
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn amount_field(obj: &Map<String, Value>, keys: &[&str]) -> Result<Option<f64>, String> {
    for key in keys {
        match obj.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::Number(n)) => {
                return n
                    .as_f64()
                    .map(Some)
                    .ok_or_else(|| format!("{} is not a finite number", key))
            }
            Some(Value::String(s)) if s.trim().is_empty() => continue,
            Some(Value::String(s)) => {
                return s
                    .trim()
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| format!("{} is not numeric: {}", key, s))
            }
            Some(other) => return Err(format!("{} has unexpected type: {}", key, other)),
        }
    }
    Ok(None)
}

/// Comparable product fields as persisted in the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    /// External id the local record is bound to, if any
    pub external_id: Option<String>,
    /// SKU
    pub sku: Option<String>,
    /// Display name
    pub name: String,
    /// Sale price
    pub price: f64,
    /// Cost price
    pub cost: Option<f64>,
    /// Barcode
    pub barcode: Option<String>,
    /// Category name
    pub category: Option<String>,
}

impl ProductFields {
    /// Create a field set with just a name and price
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            external_id: None,
            sku: None,
            name: name.into(),
            price,
            cost: None,
            barcode: None,
            category: None,
        }
    }

    /// Set the external id
    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    /// Set the SKU
    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    /// Set the cost
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// A product record owned by the product store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalProductRef {
    /// Store identifier
    pub id: i64,

    /// Fields as last persisted
    pub fields: ProductFields,

    /// When the record was last written by a sync
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// A field that takes part in reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductField {
    /// External id binding
    ExternalId,
    /// SKU
    Sku,
    /// Name
    Name,
    /// Sale price
    Price,
    /// Cost price
    Cost,
    /// Barcode
    Barcode,
    /// Category
    Category,
}

impl ProductField {
    /// Column-style name of the field
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductField::ExternalId => "external_id",
            ProductField::Sku => "sku",
            ProductField::Name => "name",
            ProductField::Price => "price",
            ProductField::Cost => "cost",
            ProductField::Barcode => "barcode",
            ProductField::Category => "category",
        }
    }
}

impl std::fmt::Display for ProductField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field value on either side of a change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Textual value
    Text(Option<String>),
    /// Monetary value
    Amount(Option<f64>),
}

/// One changed field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    /// Which field changed
    pub field: ProductField,
    /// Last persisted value
    pub old: FieldValue,
    /// Remote value
    pub new: FieldValue,
}

/// Field-by-field difference between a local record and a remote one
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductDiff {
    /// Changed fields, in field order
    pub changes: Vec<FieldChange>,
}

impl ProductDiff {
    /// Compute the changes needed to turn `local` into `remote`
    pub fn between(local: &ProductFields, remote: &ProductFields) -> Self {
        let mut diff = ProductDiff::default();

        diff.text(ProductField::ExternalId, &local.external_id, &remote.external_id);
        diff.text(ProductField::Sku, &local.sku, &remote.sku);
        if local.name != remote.name {
            diff.changes.push(FieldChange {
                field: ProductField::Name,
                old: FieldValue::Text(Some(local.name.clone())),
                new: FieldValue::Text(Some(remote.name.clone())),
            });
        }
        diff.amount(ProductField::Price, Some(local.price), Some(remote.price));
        diff.amount(ProductField::Cost, local.cost, remote.cost);
        diff.text(ProductField::Barcode, &local.barcode, &remote.barcode);
        diff.text(ProductField::Category, &local.category, &remote.category);

        diff
    }

    fn text(&mut self, field: ProductField, old: &Option<String>, new: &Option<String>) {
        if old != new {
            self.changes.push(FieldChange {
                field,
                old: FieldValue::Text(old.clone()),
                new: FieldValue::Text(new.clone()),
            });
        }
    }

    fn amount(&mut self, field: ProductField, old: Option<f64>, new: Option<f64>) {
        let differs = match (old, new) {
            (Some(a), Some(b)) => (a - b).abs() > AMOUNT_EPSILON,
            (None, None) => false,
            _ => true,
        };
        if differs {
            self.changes.push(FieldChange {
                field,
                old: FieldValue::Amount(old),
                new: FieldValue::Amount(new),
            });
        }
    }

    /// True when nothing changed
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changed fields
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether the given field changed
    pub fn contains(&self, field: ProductField) -> bool {
        self.changes.iter().any(|c| c.field == field)
    }

    /// Names of the changed fields
    pub fn field_names(&self) -> Vec<&'static str> {
        self.changes.iter().map(|c| c.field.as_str()).collect()
    }

    /// Write the new values into `fields`
    pub fn apply_to(&self, fields: &mut ProductFields) {
        for change in &self.changes {
            match (change.field, &change.new) {
                (ProductField::ExternalId, FieldValue::Text(v)) => fields.external_id = v.clone(),
                (ProductField::Sku, FieldValue::Text(v)) => fields.sku = v.clone(),
                (ProductField::Name, FieldValue::Text(Some(v))) => fields.name = v.clone(),
                (ProductField::Price, FieldValue::Amount(Some(v))) => fields.price = *v,
                (ProductField::Cost, FieldValue::Amount(v)) => fields.cost = *v,
                (ProductField::Barcode, FieldValue::Text(v)) => fields.barcode = v.clone(),
                (ProductField::Category, FieldValue::Text(v)) => fields.category = v.clone(),
                _ => {}
            }
        }
    }
}
