//! Log → queue forwarder.
//!
//! Reads the first shard of the event stream in order and re-publishes each
//! record's bytes, unchanged, as one queue message. The last handled sequence
//! number is checkpointed after every batch so a restart resumes where the
//! previous run stopped instead of replaying the whole retention window.

use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};
use transport::{LogError, SequenceNumber, ShardId, ShardIterator, StartPosition};

use crate::checkpoint::CheckpointError;
use crate::context::ForwarderContext;
use crate::shutdown::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderSettings {
    /// Upper bound on records fetched per poll.
    pub batch_size: usize,
    /// Pause between polls, whether or not records arrived.
    pub poll_interval: Duration,
    /// Pause after a fetch or send failure.
    pub error_backoff: Duration,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(2),
            error_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("Stream {0} has no shards")]
    NoShards(String),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Why [`LogForwarder::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderExit {
    /// A stop was requested.
    Shutdown,
    /// The shard was closed and has been read to its end.
    ShardClosed,
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub forwarded: usize,
    pub skipped: usize,
    /// A send failed; the rest of the batch will be fetched again.
    pub send_failed: bool,
    pub shard_closed: bool,
}

/// Sequential consumer of one log shard.
pub struct LogForwarder {
    ctx: ForwarderContext,
    shard: ShardId,
    /// `None` once the shard is closed and drained.
    iterator: Option<ShardIterator>,
    /// Set when the current iterator must be replaced before the next fetch.
    reposition: Option<StartPosition>,
    /// Last record forwarded or skipped, seeded from the checkpoint.
    last_sequence: Option<SequenceNumber>,
}

impl LogForwarder {
    /// Picks the first shard and positions after its checkpoint.
    ///
    /// A checkpoint that cannot be loaded is fatal: starting from the trim
    /// horizon instead would re-deliver the whole stream.
    pub async fn start(ctx: ForwarderContext) -> Result<Self, ForwarderError> {
        let stream = ctx.log.stream_name().to_string();
        let shard = ctx
            .log
            .list_shards()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ForwarderError::NoShards(stream.clone()))?;

        let checkpoint = ctx.checkpoints.load(&stream, &shard).await?;
        let position = match &checkpoint {
            Some(sequence) => StartPosition::AfterSequence(sequence.clone()),
            None => StartPosition::TrimHorizon,
        };
        let iterator = ctx.log.shard_iterator(&shard, &position).await?;

        info!(
            stream = %stream,
            shard = %shard,
            checkpoint = ?checkpoint.as_ref().map(SequenceNumber::as_str),
            queue = ctx.queue.name(),
            "forwarder started"
        );

        Ok(Self {
            ctx,
            shard,
            iterator: Some(iterator),
            reposition: None,
            last_sequence: checkpoint,
        })
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    pub fn last_sequence(&self) -> Option<&SequenceNumber> {
        self.last_sequence.as_ref()
    }

    fn resume_position(&self) -> StartPosition {
        match &self.last_sequence {
            Some(sequence) => StartPosition::AfterSequence(sequence.clone()),
            None => StartPosition::TrimHorizon,
        }
    }

    /// Fetches one batch and forwards it.
    ///
    /// A fetch error leaves the iterator untouched so the next call retries
    /// the same records.
    #[tracing::instrument(skip(self), fields(stream = %self.ctx.log.stream_name(), shard = %self.shard))]
    pub async fn poll_once(&mut self) -> Result<BatchReport, ForwarderError> {
        if let Some(position) = self.reposition.take() {
            match self.ctx.log.shard_iterator(&self.shard, &position).await {
                Ok(iterator) => self.iterator = Some(iterator),
                Err(e) => {
                    self.reposition = Some(position);
                    metrics::counter!("forwarder_fetch_errors_total").increment(1);
                    return Err(e.into());
                }
            }
        }

        let Some(iterator) = self.iterator.clone() else {
            return Ok(BatchReport {
                shard_closed: true,
                ..BatchReport::default()
            });
        };

        let batch = match self
            .ctx
            .log
            .get_records(&iterator, self.ctx.settings.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                metrics::counter!("forwarder_fetch_errors_total").increment(1);
                if matches!(e, LogError::InvalidIterator(_)) {
                    warn!(error = %e, "shard iterator rejected, repositioning");
                    self.reposition = Some(self.resume_position());
                }
                return Err(e.into());
            }
        };

        let mut report = BatchReport {
            fetched: batch.records.len(),
            ..BatchReport::default()
        };
        let mut handled: Option<SequenceNumber> = None;

        for record in &batch.records {
            let body = match std::str::from_utf8(&record.data) {
                Ok(body) => body,
                Err(e) => {
                    error!(
                        sequence = %record.sequence_number,
                        partition_key = %record.partition_key,
                        error = %e,
                        "record is not valid UTF-8, skipping"
                    );
                    metrics::counter!("forwarder_records_skipped_total").increment(1);
                    report.skipped += 1;
                    handled = Some(record.sequence_number.clone());
                    continue;
                }
            };

            match self.ctx.queue.send(body).await {
                Ok(message_id) => {
                    tracing::debug!(
                        sequence = %record.sequence_number,
                        message_id = %message_id,
                        "record forwarded"
                    );
                    metrics::counter!("forwarder_records_forwarded_total").increment(1);
                    report.forwarded += 1;
                    handled = Some(record.sequence_number.clone());
                }
                Err(e) => {
                    error!(
                        sequence = %record.sequence_number,
                        error = %e,
                        "failed to send record to queue"
                    );
                    metrics::counter!("forwarder_send_errors_total").increment(1);
                    report.send_failed = true;
                    break;
                }
            }
        }

        let progressed = handled.is_some();
        if let Some(sequence) = handled {
            if let Err(e) = self
                .ctx
                .checkpoints
                .save(self.ctx.log.stream_name(), &self.shard, &sequence)
                .await
            {
                warn!(sequence = %sequence, error = %e, "failed to save checkpoint");
            }
            self.last_sequence = Some(sequence);
        }

        if report.send_failed {
            // Re-read from just after the last handled record; with nothing
            // handled the current iterator already points there.
            if progressed {
                self.reposition = Some(self.resume_position());
            }
        } else {
            self.iterator = batch.next_iterator;
            report.shard_closed = self.iterator.is_none();
        }

        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                forwarded = report.forwarded,
                skipped = report.skipped,
                "batch forwarded"
            );
        }

        Ok(report)
    }

    /// Polls until stopped or the shard is closed.
    pub async fn run(mut self, mut stop: StopSignal) -> ForwarderExit {
        let settings = self.ctx.settings;
        loop {
            if stop.is_stopped() {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(report) if report.shard_closed => {
                    info!(shard = %self.shard, "shard closed, forwarder stopping");
                    return ForwarderExit::ShardClosed;
                }
                Ok(report) if report.send_failed => settings.error_backoff,
                Ok(_) => settings.poll_interval,
                Err(e) => {
                    error!(error = %e, backoff = ?settings.error_backoff, "log fetch failed");
                    settings.error_backoff
                }
            };

            if stop.sleep(delay).await {
                break;
            }
        }

        info!(shard = %self.shard, "forwarder shut down");
        ForwarderExit::Shutdown
    }
}

/// Starts a forwarder for `ctx` and runs it until stopped.
pub async fn run_forwarder(
    ctx: ForwarderContext,
    stop: StopSignal,
) -> Result<ForwarderExit, ForwarderError> {
    let forwarder = LogForwarder::start(ctx).await?;
    Ok(forwarder.run(stop).await)
}
