use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    EventLog, LogRecord, PutReceipt, RecordBatch, SequenceNumber, ShardId, ShardIterator,
    StartPosition,
};
use crate::LogError;

/// In-memory sharded log with Kinesis-like semantics.
///
/// Sequence numbers are zero-padded so that they sort lexically in append
/// order. Failures can be scripted with [`fail_next_fetch`](Self::fail_next_fetch)
/// and [`fail_next_put`](Self::fail_next_put).
#[derive(Clone)]
pub struct InMemoryEventLog {
    stream_name: String,
    state: Arc<Mutex<LogState>>,
}

struct LogState {
    shards: Vec<ShardState>,
    last_sequence: u64,
    fetch_failures: VecDeque<LogError>,
    put_failures: VecDeque<LogError>,
    fetch_calls: usize,
}

struct ShardState {
    id: ShardId,
    records: Vec<LogRecord>,
    closed: bool,
}

impl InMemoryEventLog {
    /// Creates a single-shard log.
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self::with_shards(stream_name, 1)
    }

    /// Creates a log with `shard_count` shards (at least one).
    pub fn with_shards(stream_name: impl Into<String>, shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|index| ShardState {
                id: ShardId::new(format!("shardId-{index:012}")),
                records: Vec::new(),
                closed: false,
            })
            .collect();

        Self {
            stream_name: stream_name.into(),
            state: Arc::new(Mutex::new(LogState {
                shards,
                last_sequence: 0,
                fetch_failures: VecDeque::new(),
                put_failures: VecDeque::new(),
                fetch_calls: 0,
            })),
        }
    }

    /// Makes the next `get_records` call fail with `error`.
    pub async fn fail_next_fetch(&self, error: LogError) {
        self.state.lock().await.fetch_failures.push_back(error);
    }

    /// Makes the next `put_record` call fail with `error`.
    pub async fn fail_next_put(&self, error: LogError) {
        self.state.lock().await.put_failures.push_back(error);
    }

    /// Closes a shard: readers get a terminal iterator once they reach its end.
    pub async fn close_shard(&self, shard: &ShardId) -> Result<(), LogError> {
        let mut state = self.state.lock().await;
        let shard = state
            .shards
            .iter_mut()
            .find(|s| &s.id == shard)
            .ok_or_else(|| LogError::ShardNotFound(shard.to_string()))?;
        shard.closed = true;
        Ok(())
    }

    /// Returns a copy of the records held by a shard.
    pub async fn records(&self, shard: &ShardId) -> Vec<LogRecord> {
        let state = self.state.lock().await;
        state
            .shards
            .iter()
            .find(|s| &s.id == shard)
            .map(|s| s.records.clone())
            .unwrap_or_default()
    }

    /// Total number of records across all shards.
    pub async fn record_count(&self) -> usize {
        let state = self.state.lock().await;
        state.shards.iter().map(|s| s.records.len()).sum()
    }

    /// Number of `get_records` calls served so far, failed ones included.
    pub async fn fetch_calls(&self) -> usize {
        self.state.lock().await.fetch_calls
    }

    /// Shard that owns `partition_key`.
    pub async fn shard_for_key(&self, partition_key: &str) -> ShardId {
        let state = self.state.lock().await;
        state.shards[shard_index(partition_key, state.shards.len())]
            .id
            .clone()
    }
}

/// FNV-1a over the key bytes. Stable across runs so routing is reproducible.
fn shard_index(partition_key: &str, shard_count: usize) -> usize {
    let hash = partition_key
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        });
    (hash % shard_count as u64) as usize
}

fn encode_iterator(shard: &ShardId, offset: usize) -> ShardIterator {
    ShardIterator::new(format!("{shard}:{offset}"))
}

fn decode_iterator(iterator: &ShardIterator) -> Result<(ShardId, usize), LogError> {
    let (shard, offset) = iterator
        .as_str()
        .rsplit_once(':')
        .ok_or_else(|| LogError::InvalidIterator(iterator.to_string()))?;
    let offset = offset
        .parse()
        .map_err(|_| LogError::InvalidIterator(iterator.to_string()))?;
    Ok((ShardId::new(shard), offset))
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    fn stream_name(&self) -> &str {
        &self.stream_name
    }

    async fn list_shards(&self) -> Result<Vec<ShardId>, LogError> {
        let state = self.state.lock().await;
        Ok(state.shards.iter().map(|s| s.id.clone()).collect())
    }

    async fn shard_iterator(
        &self,
        shard: &ShardId,
        position: &StartPosition,
    ) -> Result<ShardIterator, LogError> {
        let state = self.state.lock().await;
        let shard_state = state
            .shards
            .iter()
            .find(|s| &s.id == shard)
            .ok_or_else(|| LogError::ShardNotFound(shard.to_string()))?;

        let offset = match position {
            StartPosition::TrimHorizon => 0,
            StartPosition::Latest => shard_state.records.len(),
            StartPosition::AfterSequence(sequence) => shard_state
                .records
                .iter()
                .position(|r| r.sequence_number > *sequence)
                .unwrap_or(shard_state.records.len()),
        };

        Ok(encode_iterator(shard, offset))
    }

    async fn get_records(
        &self,
        iterator: &ShardIterator,
        limit: usize,
    ) -> Result<RecordBatch, LogError> {
        let mut state = self.state.lock().await;
        state.fetch_calls += 1;
        if let Some(error) = state.fetch_failures.pop_front() {
            return Err(error);
        }

        let (shard, offset) = decode_iterator(iterator)?;
        let shard_state = state
            .shards
            .iter()
            .find(|s| s.id == shard)
            .ok_or_else(|| LogError::ShardNotFound(shard.to_string()))?;

        if offset > shard_state.records.len() {
            return Err(LogError::InvalidIterator(iterator.to_string()));
        }

        let end = (offset + limit).min(shard_state.records.len());
        let records = shard_state.records[offset..end].to_vec();
        let next_iterator = if shard_state.closed && end == shard_state.records.len() {
            None
        } else {
            Some(encode_iterator(&shard, end))
        };

        Ok(RecordBatch {
            records,
            next_iterator,
        })
    }

    async fn put_record(&self, partition_key: &str, data: Vec<u8>) -> Result<PutReceipt, LogError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.put_failures.pop_front() {
            return Err(error);
        }

        let index = shard_index(partition_key, state.shards.len());
        if state.shards[index].closed {
            return Err(LogError::Request(format!(
                "shard {} is closed",
                state.shards[index].id
            )));
        }

        state.last_sequence += 1;
        let sequence_number = SequenceNumber::new(format!("{:020}", state.last_sequence));
        let shard = &mut state.shards[index];
        shard.records.push(LogRecord {
            sequence_number: sequence_number.clone(),
            partition_key: partition_key.to_string(),
            data,
        });

        Ok(PutReceipt {
            shard_id: shard.id.clone(),
            sequence_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn first_shard(log: &InMemoryEventLog) -> ShardId {
        log.list_shards().await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn records_are_read_back_in_append_order() {
        let log = InMemoryEventLog::new("events");
        for n in 0..3 {
            log.put_record("int_1", format!("r{n}").into_bytes())
                .await
                .unwrap();
        }

        let shard = first_shard(&log).await;
        let it = log
            .shard_iterator(&shard, &StartPosition::TrimHorizon)
            .await
            .unwrap();
        let batch = log.get_records(&it, 10).await.unwrap();

        let bodies: Vec<_> = batch.records.iter().map(|r| r.data.clone()).collect();
        assert_eq!(bodies, vec![b"r0".to_vec(), b"r1".to_vec(), b"r2".to_vec()]);
        assert!(batch.next_iterator.is_some());
    }

    #[tokio::test]
    async fn fetch_respects_limit_and_advances() {
        let log = InMemoryEventLog::new("events");
        for n in 0..5 {
            log.put_record("k", vec![n]).await.unwrap();
        }

        let shard = first_shard(&log).await;
        let it = log
            .shard_iterator(&shard, &StartPosition::TrimHorizon)
            .await
            .unwrap();
        let first = log.get_records(&it, 2).await.unwrap();
        assert_eq!(first.records.len(), 2);

        let second = log
            .get_records(first.next_iterator.as_ref().unwrap(), 10)
            .await
            .unwrap();
        assert_eq!(second.records.len(), 3);
        assert_eq!(second.records[0].data, vec![2]);
    }

    #[tokio::test]
    async fn same_partition_key_routes_to_same_shard() {
        let log = InMemoryEventLog::with_shards("events", 4);
        let a = log.put_record("int_7", vec![1]).await.unwrap();
        let b = log.put_record("int_7", vec![2]).await.unwrap();
        assert_eq!(a.shard_id, b.shard_id);
        assert!(a.sequence_number < b.sequence_number);
        assert_eq!(log.shard_for_key("int_7").await, a.shard_id);
    }

    #[tokio::test]
    async fn after_sequence_skips_already_seen_records() {
        let log = InMemoryEventLog::new("events");
        let first = log.put_record("k", vec![1]).await.unwrap();
        log.put_record("k", vec![2]).await.unwrap();

        let it = log
            .shard_iterator(
                &first.shard_id,
                &StartPosition::AfterSequence(first.sequence_number),
            )
            .await
            .unwrap();
        let batch = log.get_records(&it, 10).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].data, vec![2]);
    }

    #[tokio::test]
    async fn latest_starts_after_existing_records() {
        let log = InMemoryEventLog::new("events");
        log.put_record("k", vec![1]).await.unwrap();

        let shard = first_shard(&log).await;
        let it = log
            .shard_iterator(&shard, &StartPosition::Latest)
            .await
            .unwrap();
        log.put_record("k", vec![2]).await.unwrap();

        let batch = log.get_records(&it, 10).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].data, vec![2]);
    }

    #[tokio::test]
    async fn closed_shard_yields_terminal_iterator_at_end() {
        let log = InMemoryEventLog::new("events");
        log.put_record("k", vec![1]).await.unwrap();
        let shard = first_shard(&log).await;
        log.close_shard(&shard).await.unwrap();

        let it = log
            .shard_iterator(&shard, &StartPosition::TrimHorizon)
            .await
            .unwrap();
        let batch = log.get_records(&it, 10).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert!(batch.next_iterator.is_none());

        let err = log.put_record("k", vec![2]).await.unwrap_err();
        assert!(matches!(err, LogError::Request(_)));
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_once() {
        let log = InMemoryEventLog::new("events");
        log.fail_next_fetch(LogError::Request("boom".into())).await;
        log.fail_next_put(LogError::ThroughputExceeded("events".into()))
            .await;

        let err = log.put_record("k", vec![1]).await.unwrap_err();
        assert!(matches!(err, LogError::ThroughputExceeded(_)));
        log.put_record("k", vec![1]).await.unwrap();

        let shard = first_shard(&log).await;
        let it = log
            .shard_iterator(&shard, &StartPosition::TrimHorizon)
            .await
            .unwrap();
        assert!(log.get_records(&it, 10).await.is_err());
        assert_eq!(log.get_records(&it, 10).await.unwrap().records.len(), 1);
        assert_eq!(log.fetch_calls().await, 2);
    }

    #[tokio::test]
    async fn garbage_iterator_is_rejected() {
        let log = InMemoryEventLog::new("events");
        let err = log
            .get_records(&ShardIterator::new("nonsense"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::InvalidIterator(_)));
    }
}
