//! Ordered, sharded event log.

mod memory;

#[cfg(feature = "aws")]
mod kinesis;

use async_trait::async_trait;

#[cfg(feature = "aws")]
pub use kinesis::KinesisEventLog;
pub use memory::InMemoryEventLog;

use crate::LogError;

string_newtype!(
    /// Identifier of a shard within a stream.
    ShardId
);

string_newtype!(
    /// Position of a record within its shard. Assigned by the log on append.
    SequenceNumber
);

string_newtype!(
    /// Opaque read cursor over one shard, handed out by the log.
    ShardIterator
);

/// Where a new shard iterator starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    /// The oldest record still retained.
    TrimHorizon,
    /// The record right after the given sequence number.
    AfterSequence(SequenceNumber),
    /// Only records appended from now on.
    Latest,
}

/// A record read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub sequence_number: SequenceNumber,
    pub partition_key: String,
    pub data: Vec<u8>,
}

/// Result of one fetch against a shard iterator.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    pub records: Vec<LogRecord>,
    /// `None` once the shard is closed and fully read.
    pub next_iterator: Option<ShardIterator>,
}

/// Where an appended record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub shard_id: ShardId,
    pub sequence_number: SequenceNumber,
}

/// An append-only log split into shards.
///
/// Records appended with the same partition key are routed to the same shard
/// and read back in append order. Nothing is guaranteed across shards.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Name of the stream this log reads from and writes to.
    fn stream_name(&self) -> &str;

    /// Lists the shards of the stream, in the order the log reports them.
    async fn list_shards(&self) -> Result<Vec<ShardId>, LogError>;

    /// Opens an iterator over `shard` starting at `position`.
    async fn shard_iterator(
        &self,
        shard: &ShardId,
        position: &StartPosition,
    ) -> Result<ShardIterator, LogError>;

    /// Fetches up to `limit` records from `iterator`.
    async fn get_records(
        &self,
        iterator: &ShardIterator,
        limit: usize,
    ) -> Result<RecordBatch, LogError>;

    /// Appends `data` to the shard owning `partition_key`.
    async fn put_record(&self, partition_key: &str, data: Vec<u8>) -> Result<PutReceipt, LogError>;
}
