use common::TenantId;
use thiserror::Error;
use transport::LogError;

/// Errors that can occur when publishing an event to the log.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The envelope could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The envelope has no aggregate id to partition by.
    #[error("Event {0} has no aggregate id")]
    MissingPartitionKey(String),

    /// The log rejected the append.
    #[error("Log append failed: {0}")]
    Append(#[from] LogError),
}

/// Errors that can occur when decoding an event from the wire.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes are not a valid envelope.
    #[error("Malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope is valid but its payload does not match its event type.
    #[error("Invalid {event_type} payload: {source}")]
    InvalidPayload {
        event_type: String,
        source: serde_json::Error,
    },

    /// The payload names a different tenant than the envelope.
    #[error("Tenant mismatch: envelope says {envelope}, payload says {payload}")]
    TenantMismatch {
        envelope: TenantId,
        payload: TenantId,
    },
}
