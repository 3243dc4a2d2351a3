//! Shared identifier types used across the pipeline crates.

pub mod types;

pub use types::{AggregateId, TenantId};
