//! Domain models for product-sync
//!
//! This module contains the core domain models used throughout the application.

pub mod log;
pub mod outcome;
pub mod product;

// Re-export commonly used types
pub use log::{LogOperation, LogStatus, SyncLogEntry};
pub use outcome::{OutcomeKind, RunStatus, SyncCounters, SyncOutcome, SyncResult};
pub use product::{
    ExternalProduct, FieldChange, FieldValue, LocalProductRef, ProductDiff, ProductField,
    ProductFields,
};
