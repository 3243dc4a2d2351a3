//! At-least-once message queue.

mod memory;

#[cfg(feature = "aws")]
mod sqs;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::InMemoryMessageQueue;
#[cfg(feature = "aws")]
pub use sqs::SqsMessageQueue;

use crate::QueueError;

string_newtype!(
    /// Identifier assigned to a message when it is sent.
    MessageId
);

string_newtype!(
    /// Handle for one delivery of a message; needed to delete it.
    ReceiptHandle
);

/// Parameters of a receive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// Upper bound on the number of messages returned.
    pub max_messages: usize,
    /// How long to wait for messages when the queue is empty.
    pub wait_time: Duration,
    /// How long received messages stay hidden from other receivers.
    pub visibility_timeout: Duration,
}

impl Default for ReceiveRequest {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: String,
    /// How many times this message has been received, this delivery included.
    pub receive_count: u32,
}

/// A queue with visibility-timeout redelivery.
///
/// Received messages become visible again unless deleted before the
/// visibility timeout elapses. Neither FIFO order nor exactly-once delivery
/// is guaranteed.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Human-readable queue name or URL, for logs.
    fn name(&self) -> &str;

    async fn send(&self, body: &str) -> Result<MessageId, QueueError>;

    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<QueueMessage>, QueueError>;

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;
}
