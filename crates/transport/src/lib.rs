//! Transports for the two hops of the pipeline.
//!
//! - [`EventLog`]: an ordered, sharded, append-only log (Kinesis semantics:
//!   partition keys, sequence numbers, shard iterators).
//! - [`MessageQueue`]: an at-least-once queue (SQS semantics: receive with a
//!   visibility timeout, delete by receipt handle).
//!
//! Both come with in-memory implementations that honour the same contracts,
//! and AWS-backed implementations behind the `aws` feature.

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

#[cfg(feature = "aws")]
pub mod aws;
pub mod error;
pub mod log;
pub mod queue;

#[cfg(feature = "aws")]
pub use aws::AwsSettings;
pub use error::{LogError, QueueError};
#[cfg(feature = "aws")]
pub use log::KinesisEventLog;
pub use log::{
    EventLog, InMemoryEventLog, LogRecord, PutReceipt, RecordBatch, SequenceNumber, ShardId,
    ShardIterator, StartPosition,
};
#[cfg(feature = "aws")]
pub use queue::SqsMessageQueue;
pub use queue::{
    InMemoryMessageQueue, MessageId, MessageQueue, QueueMessage, ReceiptHandle, ReceiveRequest,
};
