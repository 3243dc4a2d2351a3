use thiserror::Error;

/// Errors returned by an [`EventLog`](crate::EventLog).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// The stream does not exist.
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// The shard does not exist on the stream.
    #[error("Shard not found: {0}")]
    ShardNotFound(String),

    /// Write or read throughput of the stream was exceeded.
    #[error("Throughput exceeded: {0}")]
    ThroughputExceeded(String),

    /// The shard iterator is unknown or has expired.
    #[error("Invalid shard iterator: {0}")]
    InvalidIterator(String),

    /// Any other failure talking to the log.
    #[error("Log request failed: {0}")]
    Request(String),
}

impl LogError {
    /// True for failures that are expected to clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ThroughputExceeded(_) | Self::Request(_))
    }
}

/// Errors returned by a [`MessageQueue`](crate::MessageQueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Failed to send message: {0}")]
    Send(String),

    #[error("Failed to receive messages: {0}")]
    Receive(String),

    #[error("Failed to delete message: {0}")]
    Delete(String),

    /// The receipt handle does not match an in-flight message.
    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),
}
