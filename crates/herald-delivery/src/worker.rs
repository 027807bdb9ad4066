//! Consumer worker for queued notification deliveries.
//!
//! Each worker holds one in-flight queue message at a time, re-reads
//! the persisted record as the source of truth, performs one delivery
//! attempt, applies the retry decision through compare-and-set updates,
//! and acks only after the record reflects the outcome. A crash at any
//! point before the ack causes redelivery, never loss.

use std::{sync::Arc, time::Duration};

use herald_core::{storage::notifications::UpdateOutcome, Clock};
use herald_queue::{InboundMessage, QueueBroker};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    retry::{RetryContext, RetryDecision, RetryPolicy},
    scheduler::RetryScheduler,
    sender::Dispatcher,
    store::NotificationStore,
};

/// Backoff after an infrastructure error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Resolution of one `process_next` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No message was available.
    Idle,
    /// Delivery succeeded and the record was marked sent.
    Sent,
    /// A transient failure was recorded and a retry scheduled.
    Retried,
    /// The record was marked permanently failed.
    Failed,
    /// The message referenced a missing or already-terminal record.
    Dropped,
    /// Another consumer advanced the record first; nothing was applied.
    Superseded,
}

/// Counters shared by the workers of one engine.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: std::sync::atomic::AtomicU64,
    sent: std::sync::atomic::AtomicU64,
    retried: std::sync::atomic::AtomicU64,
    failed: std::sync::atomic::AtomicU64,
    dropped: std::sync::atomic::AtomicU64,
}

/// Point-in-time copy of worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages processed, whatever their resolution.
    pub processed: u64,
    /// Deliveries marked sent.
    pub sent: u64,
    /// Attempts requeued for retry.
    pub retried: u64,
    /// Records marked permanently failed.
    pub failed: u64,
    /// Messages dropped for missing or terminal records.
    pub dropped: u64,
}

impl WorkerStats {
    fn record(&self, outcome: ProcessOutcome) {
        use std::sync::atomic::Ordering::Relaxed;

        if outcome != ProcessOutcome::Idle {
            self.processed.fetch_add(1, Relaxed);
        }
        match outcome {
            ProcessOutcome::Sent => self.sent.fetch_add(1, Relaxed),
            ProcessOutcome::Retried => self.retried.fetch_add(1, Relaxed),
            ProcessOutcome::Failed => self.failed.fetch_add(1, Relaxed),
            ProcessOutcome::Dropped => self.dropped.fetch_add(1, Relaxed),
            ProcessOutcome::Idle | ProcessOutcome::Superseded => 0,
        };
    }

    /// Reads all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        use std::sync::atomic::Ordering::Relaxed;

        StatsSnapshot {
            processed: self.processed.load(Relaxed),
            sent: self.sent.load(Relaxed),
            retried: self.retried.load(Relaxed),
            failed: self.failed.load(Relaxed),
            dropped: self.dropped.load(Relaxed),
        }
    }
}

/// Worker that consumes and resolves queued deliveries.
pub struct ConsumerWorker {
    id: usize,
    store: Arc<dyn NotificationStore>,
    broker: Arc<dyn QueueBroker>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<RetryScheduler>,
    policy: RetryPolicy,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    stats: Arc<WorkerStats>,
}

impl ConsumerWorker {
    /// Creates a worker over the given collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        store: Arc<dyn NotificationStore>,
        broker: Arc<dyn QueueBroker>,
        dispatcher: Arc<Dispatcher>,
        scheduler: Arc<RetryScheduler>,
        policy: RetryPolicy,
        poll_interval: Duration,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            id,
            store,
            broker,
            dispatcher,
            scheduler,
            policy,
            poll_interval,
            clock,
            cancellation_token,
            stats,
        }
    }

    /// Main worker loop. Consumes messages until cancelled.
    ///
    /// Infrastructure errors are logged and retried after a backoff;
    /// the unacked message they interrupted will be redelivered.
    pub async fn run(&self) {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "delivery worker received shutdown signal");
                break;
            }

            match self.process_next().await {
                Ok(ProcessOutcome::Idle) => {
                    tokio::select! {
                        () = self.clock.sleep(self.poll_interval) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Ok(_) => {},
                Err(error) => {
                    error!(
                        worker_id = self.id,
                        error = %error,
                        "message processing failed"
                    );
                    tokio::select! {
                        () = self.clock.sleep(ERROR_BACKOFF) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
    }

    /// Consumes and resolves at most one message.
    ///
    /// Exposed so tests can drive the pipeline one message at a time
    /// without spawning the loop.
    ///
    /// # Errors
    ///
    /// Returns error if a store or broker operation fails. The message
    /// stays unacked in that case and will be redelivered.
    pub async fn process_next(&self) -> Result<ProcessOutcome> {
        let Some(inbound) = self.broker.receive().await? else {
            return Ok(ProcessOutcome::Idle);
        };

        let outcome = self.resolve(inbound).await?;
        self.stats.record(outcome);
        Ok(outcome)
    }

    async fn resolve(&self, inbound: InboundMessage) -> Result<ProcessOutcome> {
        let InboundMessage { message, receipt } = inbound;

        // The record, not the message snapshot, decides what happens.
        let Some(record) = self.store.find_by_id(message.id).await? else {
            warn!(
                worker_id = self.id,
                notification_id = %message.id,
                "no record for queued message, dropping"
            );
            self.broker.ack(receipt).await?;
            return Ok(ProcessOutcome::Dropped);
        };

        if record.status.is_terminal() {
            debug!(
                worker_id = self.id,
                notification_id = %record.id,
                status = %record.status,
                "record already resolved, dropping duplicate delivery"
            );
            self.broker.ack(receipt).await?;
            return Ok(ProcessOutcome::Dropped);
        }

        let retry_count = u32::try_from(record.retry_count).unwrap_or(0);

        // A redelivered message for an already-exhausted record is
        // finalized without burning another attempt.
        if self.policy.is_exhausted(retry_count) {
            let outcome = match self
                .store
                .mark_failed(record.id, record.retry_count, record.retry_count)
                .await?
            {
                UpdateOutcome::Applied => {
                    warn!(
                        worker_id = self.id,
                        notification_id = %record.id,
                        retry_count = record.retry_count,
                        "retries already exhausted, marking failed"
                    );
                    ProcessOutcome::Failed
                },
                UpdateOutcome::Superseded => ProcessOutcome::Superseded,
            };
            self.broker.ack(receipt).await?;
            return Ok(outcome);
        }

        let send_outcome = self.dispatcher.dispatch(&record).await;

        // The attempt counts regardless of how it went.
        let attempted_count = record.retry_count + 1;
        let context = RetryContext::new(
            u32::try_from(attempted_count).unwrap_or(u32::MAX),
            send_outcome,
            self.policy.clone(),
        );

        let resolution = match context.decide() {
            RetryDecision::Sent => {
                match self.store.mark_sent(record.id, attempted_count, record.retry_count).await? {
                    UpdateOutcome::Applied => {
                        info!(
                            worker_id = self.id,
                            notification_id = %record.id,
                            channel = %record.channel,
                            "notification delivered"
                        );
                        ProcessOutcome::Sent
                    },
                    UpdateOutcome::Superseded => ProcessOutcome::Superseded,
                }
            },
            RetryDecision::Retry { delay } => {
                let next_attempt_at = self.clock.now_utc()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

                match self
                    .store
                    .schedule_retry(record.id, attempted_count, next_attempt_at, record.retry_count)
                    .await?
                {
                    UpdateOutcome::Applied => {
                        warn!(
                            worker_id = self.id,
                            notification_id = %record.id,
                            retry_count = attempted_count,
                            delay_secs = delay.as_secs(),
                            "delivery failed, retry scheduled"
                        );
                        self.scheduler.schedule(message, delay);
                        ProcessOutcome::Retried
                    },
                    UpdateOutcome::Superseded => ProcessOutcome::Superseded,
                }
            },
            RetryDecision::Failed { reason } => {
                match self
                    .store
                    .mark_failed(record.id, attempted_count, record.retry_count)
                    .await?
                {
                    UpdateOutcome::Applied => {
                        error!(
                            worker_id = self.id,
                            notification_id = %record.id,
                            retry_count = attempted_count,
                            reason = %reason,
                            "delivery permanently failed"
                        );
                        ProcessOutcome::Failed
                    },
                    UpdateOutcome::Superseded => ProcessOutcome::Superseded,
                }
            },
        };

        if resolution == ProcessOutcome::Superseded {
            debug!(
                worker_id = self.id,
                notification_id = %record.id,
                "record advanced by another consumer, discarding decision"
            );
        }

        // Ack last: the record already reflects the outcome, so a crash
        // before this point replays into a compare-and-set no-op.
        self.broker.ack(receipt).await?;
        Ok(resolution)
    }
}
