use async_trait::async_trait;
use aws_sdk_kinesis::Client;
use aws_sdk_kinesis::error::{DisplayErrorContext, SdkError};
use aws_sdk_kinesis::operation::get_records::GetRecordsError;
use aws_sdk_kinesis::operation::get_shard_iterator::GetShardIteratorError;
use aws_sdk_kinesis::operation::list_shards::ListShardsError;
use aws_sdk_kinesis::operation::put_record::PutRecordError;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::ShardIteratorType;

use super::{
    EventLog, LogRecord, PutReceipt, RecordBatch, SequenceNumber, ShardId, ShardIterator,
    StartPosition,
};
use crate::{AwsSettings, LogError};

/// Kinesis Data Streams backed [`EventLog`].
#[derive(Clone)]
pub struct KinesisEventLog {
    client: Client,
    stream_name: String,
}

impl KinesisEventLog {
    pub fn new(client: Client, stream_name: impl Into<String>) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
        }
    }

    /// Builds a client from `settings` and binds it to `stream_name`.
    pub async fn connect(settings: &AwsSettings, stream_name: impl Into<String>) -> Self {
        let config = settings.load().await;
        Self::new(Client::new(&config), stream_name)
    }
}

fn describe<E>(err: &SdkError<E>) -> String
where
    E: std::error::Error + 'static,
{
    DisplayErrorContext(err).to_string()
}

fn list_shards_error(err: SdkError<ListShardsError>, stream: &str) -> LogError {
    match err.as_service_error() {
        Some(e) if e.is_resource_not_found_exception() => LogError::StreamNotFound(stream.into()),
        _ => LogError::Request(describe(&err)),
    }
}

fn shard_iterator_error(err: SdkError<GetShardIteratorError>, shard: &ShardId) -> LogError {
    match err.as_service_error() {
        Some(e) if e.is_resource_not_found_exception() => LogError::ShardNotFound(shard.to_string()),
        Some(e) if e.is_provisioned_throughput_exceeded_exception() => {
            LogError::ThroughputExceeded(describe(&err))
        }
        _ => LogError::Request(describe(&err)),
    }
}

fn get_records_error(err: SdkError<GetRecordsError>) -> LogError {
    match err.as_service_error() {
        Some(e) if e.is_expired_iterator_exception() => LogError::InvalidIterator(describe(&err)),
        Some(e) if e.is_provisioned_throughput_exceeded_exception() => {
            LogError::ThroughputExceeded(describe(&err))
        }
        _ => LogError::Request(describe(&err)),
    }
}

fn put_record_error(err: SdkError<PutRecordError>, stream: &str) -> LogError {
    match err.as_service_error() {
        Some(e) if e.is_resource_not_found_exception() => LogError::StreamNotFound(stream.into()),
        Some(e) if e.is_provisioned_throughput_exceeded_exception() => {
            LogError::ThroughputExceeded(describe(&err))
        }
        _ => LogError::Request(describe(&err)),
    }
}

#[async_trait]
impl EventLog for KinesisEventLog {
    fn stream_name(&self) -> &str {
        &self.stream_name
    }

    async fn list_shards(&self) -> Result<Vec<ShardId>, LogError> {
        let output = self
            .client
            .list_shards()
            .stream_name(&self.stream_name)
            .send()
            .await
            .map_err(|e| list_shards_error(e, &self.stream_name))?;

        Ok(output
            .shards()
            .iter()
            .map(|shard| ShardId::new(shard.shard_id()))
            .collect())
    }

    async fn shard_iterator(
        &self,
        shard: &ShardId,
        position: &StartPosition,
    ) -> Result<ShardIterator, LogError> {
        let request = self
            .client
            .get_shard_iterator()
            .stream_name(&self.stream_name)
            .shard_id(shard.as_str());

        let request = match position {
            StartPosition::TrimHorizon => {
                request.shard_iterator_type(ShardIteratorType::TrimHorizon)
            }
            StartPosition::Latest => request.shard_iterator_type(ShardIteratorType::Latest),
            StartPosition::AfterSequence(sequence) => request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(sequence.as_str()),
        };

        let output = request
            .send()
            .await
            .map_err(|e| shard_iterator_error(e, shard))?;

        output
            .shard_iterator()
            .map(ShardIterator::new)
            .ok_or_else(|| LogError::Request(format!("no iterator returned for shard {shard}")))
    }

    async fn get_records(
        &self,
        iterator: &ShardIterator,
        limit: usize,
    ) -> Result<RecordBatch, LogError> {
        let output = self
            .client
            .get_records()
            .shard_iterator(iterator.as_str())
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(get_records_error)?;

        let records = output
            .records()
            .iter()
            .map(|record| LogRecord {
                sequence_number: SequenceNumber::new(record.sequence_number()),
                partition_key: record.partition_key().to_string(),
                data: record.data().as_ref().to_vec(),
            })
            .collect();

        Ok(RecordBatch {
            records,
            next_iterator: output.next_shard_iterator().map(ShardIterator::new),
        })
    }

    async fn put_record(&self, partition_key: &str, data: Vec<u8>) -> Result<PutReceipt, LogError> {
        let output = self
            .client
            .put_record()
            .stream_name(&self.stream_name)
            .partition_key(partition_key)
            .data(Blob::new(data))
            .send()
            .await
            .map_err(|e| put_record_error(e, &self.stream_name))?;

        Ok(PutReceipt {
            shard_id: ShardId::new(output.shard_id()),
            sequence_number: SequenceNumber::new(output.sequence_number()),
        })
    }
}
