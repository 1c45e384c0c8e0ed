//! product-sync - Idempotent product catalog synchronization
//!
//! This crate pulls product records from a remote catalog API under a
//! token-bucket rate limit with retrying requests, reconciles them against
//! a local product store and records one audit entry per processed record.

pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
pub mod telemetry;
