//! Delayed requeue of retryable notifications.
//!
//! A failed attempt must not hold its worker hostage for the backoff
//! duration. The scheduler owns that wait: the worker hands over the
//! message and the delay, acks immediately, and a background task
//! republishes once the delay elapses.

use std::{sync::Arc, time::Duration};

use herald_core::Clock;
use herald_queue::{QueueBroker, QueueMessage};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, warn};

/// Schedules delayed republishing of queue messages.
pub struct RetryScheduler {
    broker: Arc<dyn QueueBroker>,
    clock: Arc<dyn Clock>,
    tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl RetryScheduler {
    /// Creates a scheduler publishing through the given broker.
    pub fn new(broker: Arc<dyn QueueBroker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            broker,
            clock,
            tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Schedules a republish after `delay`. Returns immediately.
    ///
    /// On shutdown a pending republish fires early rather than being
    /// dropped: an early retry is harmless, a lost one strands the
    /// record until an operator notices `next_attempt_at` in the past.
    pub fn schedule(&self, message: QueueMessage, delay: Duration) {
        let broker = self.broker.clone();
        let clock = self.clock.clone();
        let cancellation_token = self.cancellation_token.clone();

        debug!(
            notification_id = %message.id,
            delay_secs = delay.as_secs(),
            "retry scheduled"
        );

        self.tracker.spawn(async move {
            tokio::select! {
                () = clock.sleep(delay) => {},
                () = cancellation_token.cancelled() => {
                    debug!(notification_id = %message.id, "flushing scheduled retry early");
                },
            }

            let id = message.id;
            if let Err(error) = broker.publish(message).await {
                // The record keeps its next_attempt_at, so the loss is
                // visible even though nothing requeues it automatically.
                warn!(
                    notification_id = %id,
                    error = %error,
                    "failed to republish scheduled retry"
                );
            }
        });
    }

    /// Number of retries still waiting to be republished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Flushes pending retries and waits for their publishes to finish.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use herald_core::{
        models::{Channel, NotificationId, UserId},
        TestClock,
    };
    use herald_queue::InMemoryBroker;

    use super::*;

    fn message(id: i64) -> QueueMessage {
        QueueMessage {
            id: NotificationId(id),
            user_id: UserId(1),
            channel: Channel::Email,
            content: "test".to_string(),
        }
    }

    async fn settle(broker: &InMemoryBroker, expected_ready: usize) {
        for _ in 0..100 {
            if broker.ready_len().await == expected_ready {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("broker never reached {expected_ready} ready messages");
    }

    #[tokio::test]
    async fn republishes_after_delay() {
        let broker = Arc::new(InMemoryBroker::new());
        let clock = Arc::new(TestClock::new());
        let scheduler = RetryScheduler::new(broker.clone(), clock);

        scheduler.schedule(message(1), Duration::from_secs(4));
        settle(&broker, 1).await;

        let inbound = broker.receive().await.unwrap().unwrap();
        assert_eq!(inbound.message.id, NotificationId(1));
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_retries() {
        let broker = Arc::new(InMemoryBroker::new());
        let clock = Arc::new(TestClock::new());
        let scheduler = RetryScheduler::new(broker.clone(), clock);

        scheduler.schedule(message(1), Duration::from_secs(300));
        scheduler.schedule(message(2), Duration::from_secs(600));
        scheduler.shutdown().await;

        assert_eq!(broker.ready_len().await, 2);
        assert_eq!(scheduler.pending(), 0);
    }
}
