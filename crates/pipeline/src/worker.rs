//! Queue → projection worker.
//!
//! Each received message is decoded as an [`EventEnvelope`] and handed to the
//! projection. A message is deleted only once the projection has accepted it;
//! anything else is left for the queue to redeliver after its visibility
//! timeout, or moved to the dead-letter queue when one is configured.

use std::collections::HashMap;
use std::time::Duration;

use events::EventEnvelope;
use futures_util::future::join_all;
use projections::{ApplyOutcome, ConflictPolicy, StaleWritePolicy};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use transport::{QueueError, QueueMessage, ReceiveRequest};

use crate::context::WorkerContext;
use crate::shutdown::StopSignal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub receive: ReceiveRequest,
    /// Pause after every receive.
    pub idle_delay: Duration,
    /// Pause after a failed receive.
    pub error_backoff: Duration,
    /// Deliveries after which a failing message is dead-lettered.
    pub max_receive_count: u32,
    pub conflict_policy: ConflictPolicy,
    pub stale_write_policy: StaleWritePolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            receive: ReceiveRequest::default(),
            idle_delay: Duration::from_secs(2),
            error_backoff: Duration::from_secs(5),
            max_receive_count: 5,
            conflict_policy: ConflictPolicy::default(),
            stale_write_policy: StaleWritePolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Receive(#[from] QueueError),
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The projection changed a row; the message was deleted.
    Applied,
    /// Accepted without a change (duplicate, stale, unknown kind); deleted.
    Ignored,
    /// The body could not be decoded.
    Malformed,
    /// Applying failed; the message will be redelivered.
    Failed,
    /// Moved to the dead-letter queue after too many deliveries.
    DeadLettered,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Ignored => "ignored",
            Self::Malformed => "malformed",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub applied: usize,
    pub ignored: usize,
    pub malformed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Applied => self.applied += 1,
            MessageOutcome::Ignored => self.ignored += 1,
            MessageOutcome::Malformed => self.malformed += 1,
            MessageOutcome::Failed => self.failed += 1,
            MessageOutcome::DeadLettered => self.dead_lettered += 1,
        }
    }
}

/// Messages for one aggregate, in receive order.
struct Group {
    key: String,
    messages: Vec<(QueueMessage, EventEnvelope)>,
}

pub struct ProjectionWorker {
    ctx: WorkerContext,
}

impl ProjectionWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Receives one batch and processes it.
    pub async fn poll_once(&self) -> Result<BatchReport, WorkerError> {
        let messages = self.ctx.queue.receive(&self.ctx.settings.receive).await?;
        Ok(self.process_batch(messages).await)
    }

    /// Applies a received batch.
    ///
    /// Messages for the same aggregate run one after another in receive
    /// order; different aggregates run concurrently. Once a message fails,
    /// the rest of its aggregate's messages are left for redelivery so they
    /// are never applied ahead of it.
    #[tracing::instrument(skip_all, fields(queue = self.ctx.queue.name(), received = messages.len()))]
    pub async fn process_batch(&self, messages: Vec<QueueMessage>) -> BatchReport {
        let mut report = BatchReport {
            received: messages.len(),
            ..BatchReport::default()
        };

        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for message in messages {
            match EventEnvelope::from_slice(message.body.as_bytes()) {
                Ok(envelope) => {
                    let key = envelope.ordering_key().to_string();
                    let slot = *index.entry(key.clone()).or_insert_with(|| {
                        groups.push(Group {
                            key,
                            messages: Vec::new(),
                        });
                        groups.len() - 1
                    });
                    groups[slot].messages.push((message, envelope));
                }
                Err(e) => {
                    let outcome = self.reject_malformed(&message, &e.to_string()).await;
                    record(&mut report, outcome);
                }
            }
        }

        let outcomes = join_all(groups.into_iter().map(|group| self.apply_group(group))).await;
        for outcome in outcomes.into_iter().flatten() {
            record(&mut report, outcome);
        }

        if report.received > 0 {
            info!(
                applied = report.applied,
                ignored = report.ignored,
                malformed = report.malformed,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "batch processed"
            );
        }
        report
    }

    async fn apply_group(&self, group: Group) -> Vec<MessageOutcome> {
        let mut outcomes = Vec::with_capacity(group.messages.len());
        let mut blocked = false;

        for (message, envelope) in group.messages {
            if blocked {
                debug!(
                    aggregate_id = %group.key,
                    message_id = %message.message_id,
                    "deferring message behind a failed one"
                );
                outcomes.push(MessageOutcome::Failed);
                continue;
            }

            let outcome = self.apply_message(&message, &envelope).await;
            blocked = outcome == MessageOutcome::Failed;
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn apply_message(&self, message: &QueueMessage, envelope: &EventEnvelope) -> MessageOutcome {
        match self.ctx.projection.handle(envelope).await {
            Ok(applied) => {
                debug!(
                    message_id = %message.message_id,
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    outcome = applied.as_str(),
                    "event handled"
                );
                self.acknowledge(message).await;
                match applied {
                    ApplyOutcome::Applied => MessageOutcome::Applied,
                    ApplyOutcome::Duplicate | ApplyOutcome::Stale | ApplyOutcome::Ignored => {
                        MessageOutcome::Ignored
                    }
                }
            }
            Err(e) if e.is_malformed() => self.reject_malformed(message, &e.to_string()).await,
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    receive_count = message.receive_count,
                    error = %e,
                    "failed to apply event, leaving for redelivery"
                );
                if message.receive_count >= self.ctx.settings.max_receive_count
                    && self.dead_letter(message).await
                {
                    MessageOutcome::DeadLettered
                } else {
                    MessageOutcome::Failed
                }
            }
        }
    }

    /// Logs a message that can never be applied, moving it to the
    /// dead-letter queue when there is one.
    async fn reject_malformed(&self, message: &QueueMessage, reason: &str) -> MessageOutcome {
        error!(
            message_id = %message.message_id,
            receive_count = message.receive_count,
            error = reason,
            "malformed message"
        );
        self.dead_letter(message).await;
        MessageOutcome::Malformed
    }

    /// Copies the message to the dead-letter queue, then deletes it.
    /// Returns false when no dead-letter queue is configured or the copy failed.
    async fn dead_letter(&self, message: &QueueMessage) -> bool {
        let Some(dead_letters) = &self.ctx.dead_letters else {
            return false;
        };

        if let Err(e) = dead_letters.send(&message.body).await {
            error!(
                message_id = %message.message_id,
                dead_letter_queue = dead_letters.name(),
                error = %e,
                "failed to dead-letter message"
            );
            return false;
        }

        warn!(
            message_id = %message.message_id,
            dead_letter_queue = dead_letters.name(),
            receive_count = message.receive_count,
            "message moved to dead-letter queue"
        );
        self.acknowledge(message).await;
        true
    }

    async fn acknowledge(&self, message: &QueueMessage) {
        if let Err(e) = self.ctx.queue.delete(&message.receipt_handle).await {
            error!(
                message_id = %message.message_id,
                error = %e,
                "failed to delete message, it will be redelivered"
            );
        }
    }

    /// Receives and applies batches until stopped.
    ///
    /// A pending receive is abandoned on stop; a batch already received is
    /// finished first.
    pub async fn run(&self, mut stop: StopSignal) {
        info!(
            queue = self.ctx.queue.name(),
            projection = self.ctx.projection.name(),
            "projection worker started"
        );

        loop {
            if stop.is_stopped() {
                break;
            }

            let received = tokio::select! {
                result = self.ctx.queue.receive(&self.ctx.settings.receive) => result,
                () = stop.stopped() => break,
            };

            let delay = match received {
                Ok(messages) => {
                    self.process_batch(messages).await;
                    self.ctx.settings.idle_delay
                }
                Err(e) => {
                    error!(error = %e, backoff = ?self.ctx.settings.error_backoff, "receive failed");
                    metrics::counter!("worker_receive_errors_total").increment(1);
                    self.ctx.settings.error_backoff
                }
            };

            if stop.sleep(delay).await {
                break;
            }
        }

        let position = self.ctx.projection.position().await;
        info!(
            position = %position,
            "projection worker shut down"
        );
    }
}

fn record(report: &mut BatchReport, outcome: MessageOutcome) {
    metrics::counter!("worker_messages_total", "outcome" => outcome.as_str()).increment(1);
    report.record(outcome);
}

/// Runs a worker for `ctx` until stopped.
pub async fn run_worker(ctx: WorkerContext, stop: StopSignal) {
    ProjectionWorker::new(ctx).run(stop).await;
}
