//! Projection error types.

use common::{AggregateId, TenantId};
use thiserror::Error;

/// Errors that can occur while applying events to the read model.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The event could not be decoded into a known payload.
    #[error("Decode error: {0}")]
    Decode(#[from] events::DecodeError),

    /// A "created" event hit an existing row under the strict create policy.
    #[error("Intervention {0} already exists")]
    Conflict(AggregateId),

    /// A mutation targeted a row that is not (yet) in the read model.
    #[error("Intervention {id} not found for tenant {tenant}")]
    RowMissing { id: AggregateId, tenant: TenantId },

    /// A stored row could not be mapped back to its Rust type.
    #[error("Corrupt row {id}: {reason}")]
    CorruptRow { id: String, reason: String },

    /// The backing store failed. Usually transient.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl ProjectionError {
    /// True for errors caused by the message itself rather than the store;
    /// redelivering such a message cannot succeed.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
