use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use transport::EventLog;

use crate::{EventEnvelope, PublishError};

/// Where a published event landed on the log.
pub type PublishReceipt = transport::PutReceipt;

/// Publishes envelopes for downstream consumers.
///
/// Called by the write side after it has committed its own state. There is no
/// internal retry and publishing is not idempotent: publishing the same
/// envelope twice appends it twice.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<PublishReceipt, PublishError>;
}

/// [`EventPublisher`] appending to an ordered log, partitioned by aggregate.
#[derive(Clone)]
pub struct LogPublisher {
    log: Arc<dyn EventLog>,
}

impl LogPublisher {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl EventPublisher for LogPublisher {
    #[tracing::instrument(
        skip(self, envelope),
        fields(
            stream = self.log.stream_name(),
            event_type = %envelope.event_type,
            aggregate_id = %envelope.aggregate_id,
        )
    )]
    async fn publish(&self, envelope: &EventEnvelope) -> Result<PublishReceipt, PublishError> {
        if envelope.aggregate_id.is_empty() {
            return Err(PublishError::MissingPartitionKey(envelope.event_id.to_string()));
        }

        let data = envelope.to_vec()?;
        let receipt = match self.log.put_record(envelope.aggregate_id.as_str(), data).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(error = %e, "failed to publish event");
                metrics::counter!("events_publish_failures_total").increment(1);
                return Err(e.into());
            }
        };

        metrics::counter!(
            "events_published_total",
            "event_type" => envelope.event_type.to_string()
        )
        .increment(1);
        info!(
            event_id = %envelope.event_id,
            shard_id = %receipt.shard_id,
            sequence_number = %receipt.sequence_number,
            "published event"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{AggregateId, TenantId};
    use transport::{InMemoryEventLog, LogError, StartPosition};

    use super::*;
    use crate::payload::InterventionCompleted;
    use crate::{EventFactory, EventType};

    fn completed(id: &str) -> EventEnvelope {
        EventFactory::default()
            .completed(&InterventionCompleted {
                intervention_id: AggregateId::new(id),
                tenant_id: TenantId::new("t1"),
                completed_at: Utc::now(),
                notes: Some("done".into()),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn publish_appends_envelope_bytes() {
        let log = InMemoryEventLog::new("intervention-events");
        let publisher = LogPublisher::new(Arc::new(log.clone()));
        let envelope = completed("int_1");

        let receipt = publisher.publish(&envelope).await.unwrap();

        let records = log.records(&receipt.shard_id).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].partition_key, "int_1");
        assert_eq!(records[0].sequence_number, receipt.sequence_number);
        assert_eq!(EventEnvelope::from_slice(&records[0].data).unwrap(), envelope);
    }

    #[tokio::test]
    async fn same_aggregate_keeps_emission_order() {
        let log = InMemoryEventLog::with_shards("intervention-events", 4);
        let publisher = LogPublisher::new(Arc::new(log.clone()));

        let first = completed("int_7");
        let second = completed("int_7");
        let a = publisher.publish(&first).await.unwrap();
        let b = publisher.publish(&second).await.unwrap();
        assert_eq!(a.shard_id, b.shard_id);

        let iterator = log
            .shard_iterator(&a.shard_id, &StartPosition::TrimHorizon)
            .await
            .unwrap();
        let batch = log.get_records(&iterator, 10).await.unwrap();
        let ids: Vec<_> = batch
            .records
            .iter()
            .map(|r| EventEnvelope::from_slice(&r.data).unwrap().event_id)
            .collect();
        assert_eq!(ids, vec![first.event_id, second.event_id]);
    }

    #[tokio::test]
    async fn publishing_twice_duplicates() {
        let log = InMemoryEventLog::new("intervention-events");
        let publisher = LogPublisher::new(Arc::new(log.clone()));
        let envelope = completed("int_1");

        publisher.publish(&envelope).await.unwrap();
        publisher.publish(&envelope).await.unwrap();
        assert_eq!(log.record_count().await, 2);
    }

    #[tokio::test]
    async fn append_rejection_is_surfaced() {
        let log = InMemoryEventLog::new("intervention-events");
        log.fail_next_put(LogError::ThroughputExceeded("slow down".into()))
            .await;
        let publisher = LogPublisher::new(Arc::new(log.clone()));

        let err = publisher.publish(&completed("int_1")).await.unwrap_err();
        assert!(matches!(
            err,
            PublishError::Append(LogError::ThroughputExceeded(_))
        ));
        assert_eq!(log.record_count().await, 0);
    }

    #[tokio::test]
    async fn envelope_without_aggregate_is_rejected() {
        let log = InMemoryEventLog::new("intervention-events");
        let publisher = LogPublisher::new(Arc::new(log));
        let envelope = EventEnvelope::builder()
            .event_type(EventType::InterventionCancelled)
            .aggregate_id("")
            .tenant_id("t1")
            .payload_raw(Default::default())
            .try_build()
            .unwrap();

        let err = publisher.publish(&envelope).await.unwrap_err();
        assert!(matches!(err, PublishError::MissingPartitionKey(_)));
    }
}
