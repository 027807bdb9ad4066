//! End-to-end consumer worker tests over the in-memory broker and
//! store.
//!
//! Each test publishes messages, drives the worker one message at a
//! time with `process_next`, and asserts on the record state, the
//! sender call log, and the broker queues.

use std::{sync::Arc, time::Duration};

use herald_core::{
    models::{Channel, Notification, NotificationId, NotificationStatus, UserId},
    Clock, TestClock,
};
use herald_delivery::{
    sender::mock::MockSender,
    store::mock::MockNotificationStore,
    ConsumerWorker, DeliveryConfig, DeliveryEngine, Dispatcher, NotificationStore,
    ProcessOutcome, RetryPolicy, RetryScheduler, SendOutcome, WorkerStats,
};
use herald_queue::{InMemoryBroker, QueueBroker, QueueMessage};
use tokio_util::sync::CancellationToken;

struct TestPipeline {
    store: Arc<MockNotificationStore>,
    broker: Arc<InMemoryBroker>,
    sender: Arc<MockSender>,
    clock: Arc<TestClock>,
    worker: ConsumerWorker,
}

impl TestPipeline {
    fn new() -> Self {
        let store = Arc::new(MockNotificationStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let sender = Arc::new(MockSender::new(Channel::Email));
        let clock = Arc::new(TestClock::new());

        let dispatcher =
            Arc::new(Dispatcher::new(Duration::from_secs(30)).with_sender(sender.clone()));
        let scheduler = Arc::new(RetryScheduler::new(
            broker.clone() as Arc<dyn QueueBroker>,
            clock.clone() as Arc<dyn Clock>,
        ));

        let worker = ConsumerWorker::new(
            0,
            store.clone() as Arc<dyn NotificationStore>,
            broker.clone() as Arc<dyn QueueBroker>,
            dispatcher,
            scheduler,
            RetryPolicy::default(),
            Duration::from_millis(10),
            clock.clone() as Arc<dyn Clock>,
            CancellationToken::new(),
            Arc::new(WorkerStats::default()),
        );

        Self { store, broker, sender, clock, worker }
    }

    fn seed(&self, id: i64) -> Notification {
        self.store.insert_pending(
            NotificationId(id),
            UserId(42),
            Channel::Email,
            "order shipped",
        )
    }

    async fn publish(&self, notification: &Notification) {
        self.broker
            .publish(QueueMessage::from_notification(notification))
            .await
            .expect("publish should succeed");
    }

    /// Waits until the scheduler's delayed republish lands on the
    /// broker. The test clock collapses backoff sleeps, so this only
    /// needs to yield until the spawned task runs.
    async fn await_requeue(&self) {
        for _ in 0..100 {
            if self.broker.ready_len().await > 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("scheduled retry never reached the broker");
    }
}

fn transient() -> SendOutcome {
    SendOutcome::TransientFailure("gateway returned 503".to_string())
}

#[tokio::test]
async fn successful_delivery_marks_record_sent() {
    let pipeline = TestPipeline::new();
    let notification = pipeline.seed(1);
    pipeline.publish(&notification).await;

    let outcome = pipeline.worker.process_next().await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Sent);

    let record = pipeline.store.get(notification.id).unwrap();
    assert_eq!(record.status, NotificationStatus::Sent);
    assert_eq!(record.retry_count, 1);
    assert!(record.sent_at.is_some());
    assert!(record.next_attempt_at.is_none());

    assert_eq!(pipeline.sender.call_count(), 1);
    assert_eq!(pipeline.broker.in_flight_len().await, 0);
}

#[tokio::test]
async fn transient_failure_then_success_converges_to_sent() {
    let pipeline = TestPipeline::new();
    let notification = pipeline.seed(1);
    pipeline.sender.push_outcome(transient());
    pipeline.publish(&notification).await;

    let before = pipeline.clock.now_utc();
    let outcome = pipeline.worker.process_next().await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Retried);

    let record = pipeline.store.get(notification.id).unwrap();
    assert_eq!(record.status, NotificationStatus::Pending);
    assert_eq!(record.retry_count, 1);
    // First retry backs off by 2^1 seconds.
    assert_eq!(record.next_attempt_at.unwrap(), before + chrono::Duration::seconds(2));

    pipeline.await_requeue().await;
    let outcome = pipeline.worker.process_next().await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Sent);

    let record = pipeline.store.get(notification.id).unwrap();
    assert_eq!(record.status, NotificationStatus::Sent);
    assert_eq!(record.retry_count, 2);
    assert_eq!(pipeline.sender.call_count(), 2);
}

#[tokio::test]
async fn persistent_transient_failure_exhausts_retries() {
    let pipeline = TestPipeline::new();
    let notification = pipeline.seed(1);
    for _ in 0..3 {
        pipeline.sender.push_outcome(transient());
    }
    pipeline.publish(&notification).await;

    assert_eq!(pipeline.worker.process_next().await.unwrap(), ProcessOutcome::Retried);
    pipeline.await_requeue().await;
    assert_eq!(pipeline.worker.process_next().await.unwrap(), ProcessOutcome::Retried);
    pipeline.await_requeue().await;
    assert_eq!(pipeline.worker.process_next().await.unwrap(), ProcessOutcome::Failed);

    let record = pipeline.store.get(notification.id).unwrap();
    assert_eq!(record.status, NotificationStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert!(record.failed_at.is_some());
    assert!(record.next_attempt_at.is_none());

    // Exactly one attempt per delivery, no extras after exhaustion.
    assert_eq!(pipeline.sender.call_count(), 3);
    assert_eq!(pipeline.broker.ready_len().await, 0);
    assert_eq!(pipeline.broker.in_flight_len().await, 0);
}

#[tokio::test]
async fn message_for_missing_record_is_dropped() {
    let pipeline = TestPipeline::new();
    let message = QueueMessage {
        id: NotificationId(999),
        user_id: UserId(42),
        channel: Channel::Email,
        content: "orphaned".to_string(),
    };
    pipeline.broker.publish(message).await.unwrap();

    let outcome = pipeline.worker.process_next().await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Dropped);

    assert_eq!(pipeline.sender.call_count(), 0);
    assert_eq!(pipeline.broker.in_flight_len().await, 0);
}

#[tokio::test]
async fn duplicate_delivery_of_resolved_record_is_dropped() {
    let pipeline = TestPipeline::new();
    let notification = pipeline.seed(1);
    pipeline.publish(&notification).await;
    pipeline.publish(&notification).await;

    assert_eq!(pipeline.worker.process_next().await.unwrap(), ProcessOutcome::Sent);
    assert_eq!(pipeline.worker.process_next().await.unwrap(), ProcessOutcome::Dropped);

    let record = pipeline.store.get(notification.id).unwrap();
    assert_eq!(record.status, NotificationStatus::Sent);
    assert_eq!(record.retry_count, 1);
    assert_eq!(pipeline.sender.call_count(), 1);
}

#[tokio::test]
async fn exhausted_record_is_finalized_without_an_attempt() {
    let pipeline = TestPipeline::new();
    let mut notification = pipeline.seed(1);
    notification.retry_count = 3;
    pipeline.store.insert(notification.clone());
    pipeline.publish(&notification).await;

    let outcome = pipeline.worker.process_next().await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed);

    let record = pipeline.store.get(notification.id).unwrap();
    assert_eq!(record.status, NotificationStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert_eq!(pipeline.sender.call_count(), 0);
}

#[tokio::test]
async fn exhausted_guard_defers_to_a_record_already_finalized() {
    let pipeline = TestPipeline::new();
    let mut notification = pipeline.seed(1);
    notification.retry_count = 3;

    // Another consumer already marked the record failed; this worker
    // still sees the exhausted-but-pending snapshot.
    let mut current = notification.clone();
    current.status = NotificationStatus::Failed;
    pipeline.store.insert(current);
    pipeline.store.inject_stale_read(notification.clone());
    pipeline.publish(&notification).await;

    let outcome = pipeline.worker.process_next().await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Superseded);

    assert_eq!(pipeline.sender.call_count(), 0);
    assert_eq!(pipeline.broker.in_flight_len().await, 0);
}

#[tokio::test]
async fn permanent_failure_fails_without_retry() {
    let pipeline = TestPipeline::new();
    let notification = pipeline.seed(1);
    pipeline
        .sender
        .push_outcome(SendOutcome::PermanentFailure("gateway rejected request: 400".to_string()));
    pipeline.publish(&notification).await;

    let outcome = pipeline.worker.process_next().await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed);

    let record = pipeline.store.get(notification.id).unwrap();
    assert_eq!(record.status, NotificationStatus::Failed);
    assert_eq!(record.retry_count, 1);
    assert_eq!(pipeline.sender.call_count(), 1);
    assert_eq!(pipeline.broker.ready_len().await, 0);
}

#[tokio::test]
async fn stale_read_discards_decision_but_acks() {
    let pipeline = TestPipeline::new();
    let notification = pipeline.seed(1);

    // Another consumer already advanced the record to retry_count 1;
    // this worker still sees the original snapshot.
    let mut current = notification.clone();
    current.retry_count = 1;
    pipeline.store.insert(current);
    pipeline.store.inject_stale_read(notification.clone());
    pipeline.publish(&notification).await;

    let outcome = pipeline.worker.process_next().await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Superseded);

    let record = pipeline.store.get(notification.id).unwrap();
    assert_eq!(record.status, NotificationStatus::Pending);
    assert_eq!(record.retry_count, 1);
    assert_eq!(pipeline.broker.in_flight_len().await, 0);
}

#[tokio::test]
async fn store_error_leaves_message_unacked_for_redelivery() {
    let pipeline = TestPipeline::new();
    let notification = pipeline.seed(1);
    pipeline.publish(&notification).await;
    pipeline.store.inject_error("connection reset");

    pipeline.worker.process_next().await.unwrap_err();
    assert_eq!(pipeline.broker.in_flight_len().await, 1);
    assert_eq!(pipeline.sender.call_count(), 0);

    pipeline.broker.redeliver_inflight().await;
    let outcome = pipeline.worker.process_next().await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Sent);
    assert_eq!(pipeline.store.get(notification.id).unwrap().status, NotificationStatus::Sent);
}

#[tokio::test]
async fn idle_when_queue_is_empty() {
    let pipeline = TestPipeline::new();
    assert_eq!(pipeline.worker.process_next().await.unwrap(), ProcessOutcome::Idle);
}

#[tokio::test]
async fn engine_delivers_and_shuts_down_cleanly() {
    let store = Arc::new(MockNotificationStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let sender = Arc::new(MockSender::new(Channel::Email));
    let clock = Arc::new(TestClock::new());

    let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(30)).with_sender(sender));
    let config = DeliveryConfig {
        poll_interval: Duration::from_millis(5),
        ..DeliveryConfig::default()
    };

    let engine = DeliveryEngine::new(
        store.clone() as Arc<dyn NotificationStore>,
        vec![broker.clone() as Arc<dyn QueueBroker>, broker.clone() as Arc<dyn QueueBroker>],
        dispatcher,
        config,
        clock as Arc<dyn Clock>,
    )
    .unwrap();

    let notification =
        store.insert_pending(NotificationId(1), UserId(7), Channel::Email, "welcome");
    broker.publish(QueueMessage::from_notification(&notification)).await.unwrap();

    engine.start();

    let mut delivered = false;
    for _ in 0..200 {
        if engine.stats().sent == 1 {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(delivered, "engine never delivered the notification");

    engine.shutdown().await.unwrap();
    assert_eq!(store.get(notification.id).unwrap().status, NotificationStatus::Sent);
}
