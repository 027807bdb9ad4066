//! Delivery engine coordinating consumer workers.

use std::{sync::Arc, time::Duration};

use herald_core::Clock;
use herald_queue::QueueBroker;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

use crate::{
    error::{DeliveryError, Result},
    retry::RetryPolicy,
    scheduler::RetryScheduler,
    sender::Dispatcher,
    store::NotificationStore,
    worker::{ConsumerWorker, StatsSnapshot, WorkerStats},
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,

    /// Upper bound on a single delivery attempt.
    pub attempt_timeout: Duration,

    /// Retry policy applied to every notification.
    pub retry_policy: RetryPolicy,

    /// Maximum time to wait for workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Coordinates a pool of consumer workers over one queue.
///
/// Takes one broker handle per worker so each worker can carry its own
/// consumer identity within the shared group. The first handle doubles
/// as the scheduler's publish path.
pub struct DeliveryEngine {
    store: Arc<dyn NotificationStore>,
    brokers: Vec<Arc<dyn QueueBroker>>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<RetryScheduler>,
    config: DeliveryConfig,
    clock: Arc<dyn Clock>,
    stats: Arc<WorkerStats>,
    cancellation_token: CancellationToken,
    tracker: TaskTracker,
}

impl DeliveryEngine {
    /// Creates an engine with one worker per broker handle.
    ///
    /// # Errors
    ///
    /// Returns error if no broker handles are given.
    pub fn new(
        store: Arc<dyn NotificationStore>,
        brokers: Vec<Arc<dyn QueueBroker>>,
        dispatcher: Arc<Dispatcher>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let Some(publisher) = brokers.first() else {
            return Err(DeliveryError::Internal(
                "delivery engine needs at least one broker handle".to_string(),
            ));
        };

        let scheduler = Arc::new(RetryScheduler::new(publisher.clone(), clock.clone()));

        Ok(Self {
            store,
            brokers,
            dispatcher,
            scheduler,
            config,
            clock,
            stats: Arc::new(WorkerStats::default()),
            cancellation_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Spawns the worker pool. Returns once all workers are running.
    pub fn start(&self) {
        info!(worker_count = self.brokers.len(), "starting notification delivery engine");

        for (id, broker) in self.brokers.iter().enumerate() {
            let worker = ConsumerWorker::new(
                id,
                self.store.clone(),
                broker.clone(),
                self.dispatcher.clone(),
                self.scheduler.clone(),
                self.config.retry_policy.clone(),
                self.config.poll_interval,
                self.clock.clone(),
                self.cancellation_token.clone(),
                self.stats.clone(),
            );
            self.tracker.spawn(async move { worker.run().await });
        }

        self.tracker.close();
        info!("delivery engine started");
    }

    /// Signals workers to stop and waits for in-flight work to finish.
    ///
    /// Workers finish their current message before exiting; scheduled
    /// retries are flushed back onto the queue.
    ///
    /// # Errors
    ///
    /// Returns error if workers do not stop within the shutdown
    /// timeout.
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down delivery engine");

        self.cancellation_token.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait()).await.is_err() {
            return Err(DeliveryError::Internal(format!(
                "workers did not stop within {}s",
                self.config.shutdown_timeout.as_secs()
            )));
        }

        self.scheduler.shutdown().await;

        info!("delivery engine stopped");
        Ok(())
    }

    /// Current counters across all workers.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
