//! Queue broker abstraction and implementations.
//!
//! The broker contract is durable, at-least-once delivery with explicit
//! per-message acknowledgment: a published message survives until some
//! consumer acks it, and a consumer crash before ack causes redelivery.
//! Production uses Redis Streams with a consumer group; tests use the
//! deterministic in-memory broker in [`memory`].

use std::{future::Future, pin::Pin};

use redis::{
    aio::ConnectionManager,
    streams::{StreamReadOptions, StreamReadReply},
    AsyncCommands, Client,
};
use tracing::{debug, info, warn};

use crate::{
    error::{BrokerError, Result},
    message::QueueMessage,
};

/// Default stream name for notification delivery messages.
pub const DEFAULT_STREAM: &str = "notifications";

/// Default consumer group shared by all delivery workers.
pub const DEFAULT_GROUP: &str = "delivery";

/// Opaque acknowledgment handle for a received message.
///
/// Wraps the broker-specific entry id. Acking with a receipt removes
/// the message from the redelivery set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt(pub String);

/// A message received from the queue together with its ack handle.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Decoded message payload.
    pub message: QueueMessage,
    /// Handle for acknowledging this delivery.
    pub receipt: Receipt,
}

/// Queue broker operations required by the submission gateway and the
/// consumer workers.
///
/// Implementations must not auto-ack on receipt: a message counts as
/// in-flight until [`QueueBroker::ack`] is called, and unacked messages
/// are eligible for redelivery.
pub trait QueueBroker: Send + Sync + 'static {
    /// Publishes a message to the durable queue.
    ///
    /// Failures propagate to the caller; they are never swallowed.
    fn publish(
        &self,
        message: QueueMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Receives at most one message.
    ///
    /// Returns `None` when the queue is empty; idle pacing belongs to
    /// the caller. Consumers hold exactly one in-flight message at a
    /// time (prefetch 1).
    fn receive(&self) -> Pin<Box<dyn Future<Output = Result<Option<InboundMessage>>> + Send + '_>>;

    /// Acknowledges a previously received message.
    fn ack(&self, receipt: Receipt) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Redis Streams broker.
///
/// `XADD` persists messages to a named stream; consumers read through a
/// consumer group with `COUNT 1` so each worker holds one in-flight
/// entry, and `XACK` releases it. Entries delivered but never acked
/// stay in the group's pending-entries list, from which they can be
/// claimed again after a consumer crash.
///
/// All handles multiplex one managed connection, so reads never use
/// `BLOCK`: a server-side block would stall every other command on the
/// connection, including publishes and acks from other handles. An
/// empty read returns `None` and the consumer's poll interval paces the
/// next one.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
}

impl RedisBroker {
    /// Connects to Redis and idempotently creates the consumer group.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Connection` if the connection cannot be
    /// established or group creation fails for a reason other than the
    /// group already existing.
    pub async fn connect(redis_url: &str, stream: &str, group: &str) -> Result<Self> {
        let client =
            Client::open(redis_url).map_err(|e| BrokerError::Connection(e.to_string()))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        ensure_group(&mut conn, stream, group).await?;

        info!(stream, group, "connected to queue broker");

        Ok(Self {
            conn,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: "consumer-0".to_string(),
        })
    }

    /// Returns a handle reading as a distinct named consumer.
    ///
    /// Each worker gets its own consumer name within the shared group so
    /// pending entries can be attributed after a crash.
    pub fn with_consumer(&self, consumer: impl Into<String>) -> Self {
        Self { consumer: consumer.into(), ..self.clone() }
    }
}

/// Creates the consumer group, tolerating an already-existing one.
async fn ensure_group(conn: &mut ConnectionManager, stream: &str, group: &str) -> Result<()> {
    let created: std::result::Result<(), redis::RedisError> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream)
        .arg(group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match created {
        Ok(()) => Ok(()),
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(BrokerError::Connection(e.to_string())),
    }
}

impl QueueBroker for RedisBroker {
    fn publish(
        &self,
        message: QueueMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let mut conn = self.conn.clone();
        let stream = self.stream.clone();

        Box::pin(async move {
            let payload = serde_json::to_string(&message)?;

            let entry_id: String = redis::cmd("XADD")
                .arg(&stream)
                .arg("*")
                .arg("payload")
                .arg(&payload)
                .query_async(&mut conn)
                .await
                .map_err(|e| BrokerError::Publish(e.to_string()))?;

            debug!(notification_id = %message.id, entry_id, "published queue message");
            Ok(())
        })
    }

    fn receive(&self) -> Pin<Box<dyn Future<Output = Result<Option<InboundMessage>>> + Send + '_>> {
        let mut conn = self.conn.clone();
        let stream = self.stream.clone();
        let group = self.group.clone();
        let consumer = self.consumer.clone();

        Box::pin(async move {
            // COUNT 1 keeps prefetch at exactly one in-flight entry.
            // No BLOCK: the connection is multiplexed across handles.
            let options = StreamReadOptions::default().group(&group, &consumer).count(1);

            let reply: Option<StreamReadReply> = conn
                .xread_options(&[stream.as_str()], &[">"], &options)
                .await
                .map_err(|e| BrokerError::Consume(e.to_string()))?;

            let Some(reply) = reply else { return Ok(None) };
            let Some(entry) = reply.keys.into_iter().flat_map(|key| key.ids).next() else {
                return Ok(None);
            };

            let receipt = Receipt(entry.id.clone());
            let payload: String = match entry.map.get("payload") {
                Some(value) => redis::from_redis_value(value)
                    .map_err(|e| BrokerError::Consume(e.to_string()))?,
                None => {
                    // Poison entry: ack so it cannot wedge the group.
                    warn!(entry_id = %entry.id, "stream entry missing payload field, dropping");
                    ack_entry(&mut conn, &stream, &group, &receipt.0).await?;
                    return Ok(None);
                },
            };

            match serde_json::from_str::<QueueMessage>(&payload) {
                Ok(message) => Ok(Some(InboundMessage { message, receipt })),
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "undecodable queue message, dropping");
                    ack_entry(&mut conn, &stream, &group, &receipt.0).await?;
                    Ok(None)
                },
            }
        })
    }

    fn ack(&self, receipt: Receipt) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let mut conn = self.conn.clone();
        let stream = self.stream.clone();
        let group = self.group.clone();

        Box::pin(async move { ack_entry(&mut conn, &stream, &group, &receipt.0).await })
    }
}

async fn ack_entry(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
    entry_id: &str,
) -> Result<()> {
    let _acked: i64 = redis::cmd("XACK")
        .arg(stream)
        .arg(group)
        .arg(entry_id)
        .query_async(conn)
        .await
        .map_err(|e| BrokerError::Acknowledge(e.to_string()))?;

    Ok(())
}

pub mod memory {
    //! In-memory broker for deterministic tests.
    //!
    //! Models the at-least-once contract without Redis: received
    //! messages move to an in-flight map until acked, and
    //! `redeliver_inflight` simulates a consumer crash by pushing them
    //! back onto the ready queue.

    use std::{
        collections::{HashMap, VecDeque},
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    };

    use tokio::sync::RwLock;

    use super::{InboundMessage, QueueBroker, Receipt};
    use crate::{
        error::{BrokerError, Result},
        message::QueueMessage,
    };

    /// Deterministic queue broker backed by process memory.
    pub struct InMemoryBroker {
        ready: Arc<RwLock<VecDeque<QueueMessage>>>,
        in_flight: Arc<RwLock<HashMap<String, QueueMessage>>>,
        next_receipt: Arc<AtomicU64>,
        publish_error: Arc<RwLock<Option<String>>>,
    }

    impl InMemoryBroker {
        /// Creates an empty broker.
        pub fn new() -> Self {
            Self {
                ready: Arc::new(RwLock::new(VecDeque::new())),
                in_flight: Arc::new(RwLock::new(HashMap::new())),
                next_receipt: Arc::new(AtomicU64::new(0)),
                publish_error: Arc::new(RwLock::new(None)),
            }
        }

        /// Makes the next publish call fail with the given message.
        pub async fn inject_publish_error(&self, error: impl Into<String>) {
            *self.publish_error.write().await = Some(error.into());
        }

        /// Simulates a consumer crash: every received-but-unacked
        /// message becomes deliverable again.
        pub async fn redeliver_inflight(&self) {
            let mut in_flight = self.in_flight.write().await;
            let mut ready = self.ready.write().await;
            for (_, message) in in_flight.drain() {
                ready.push_back(message);
            }
        }

        /// Number of messages waiting for delivery.
        pub async fn ready_len(&self) -> usize {
            self.ready.read().await.len()
        }

        /// Number of received-but-unacked messages.
        pub async fn in_flight_len(&self) -> usize {
            self.in_flight.read().await.len()
        }
    }

    impl Default for InMemoryBroker {
        fn default() -> Self {
            Self::new()
        }
    }

    impl QueueBroker for InMemoryBroker {
        fn publish(
            &self,
            message: QueueMessage,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let ready = self.ready.clone();
            let publish_error = self.publish_error.clone();

            Box::pin(async move {
                if let Some(error) = publish_error.write().await.take() {
                    return Err(BrokerError::Publish(error));
                }

                ready.write().await.push_back(message);
                Ok(())
            })
        }

        fn receive(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<Option<InboundMessage>>> + Send + '_>> {
            let ready = self.ready.clone();
            let in_flight = self.in_flight.clone();
            let next_receipt = self.next_receipt.clone();

            Box::pin(async move {
                let Some(message) = ready.write().await.pop_front() else {
                    return Ok(None);
                };

                let receipt = Receipt(next_receipt.fetch_add(1, Ordering::AcqRel).to_string());
                in_flight.write().await.insert(receipt.0.clone(), message.clone());

                Ok(Some(InboundMessage { message, receipt }))
            })
        }

        fn ack(&self, receipt: Receipt) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let in_flight = self.in_flight.clone();

            Box::pin(async move {
                // Acking twice is harmless, matching broker semantics.
                in_flight.write().await.remove(&receipt.0);
                Ok(())
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use herald_core::models::{Channel, NotificationId, UserId};

        use super::*;

        fn message(id: i64) -> QueueMessage {
            QueueMessage {
                id: NotificationId(id),
                user_id: UserId(1),
                channel: Channel::Email,
                content: "test".to_string(),
            }
        }

        #[tokio::test]
        async fn delivers_in_publish_order() {
            let broker = InMemoryBroker::new();
            broker.publish(message(1)).await.unwrap();
            broker.publish(message(2)).await.unwrap();

            let first = broker.receive().await.unwrap().unwrap();
            let second = broker.receive().await.unwrap().unwrap();
            assert_eq!(first.message.id, NotificationId(1));
            assert_eq!(second.message.id, NotificationId(2));
            assert!(broker.receive().await.unwrap().is_none());
        }

        #[tokio::test]
        async fn ack_removes_from_in_flight() {
            let broker = InMemoryBroker::new();
            broker.publish(message(1)).await.unwrap();

            let inbound = broker.receive().await.unwrap().unwrap();
            assert_eq!(broker.in_flight_len().await, 1);

            broker.ack(inbound.receipt).await.unwrap();
            assert_eq!(broker.in_flight_len().await, 0);
            assert_eq!(broker.ready_len().await, 0);
        }

        #[tokio::test]
        async fn unacked_messages_are_redelivered() {
            let broker = InMemoryBroker::new();
            broker.publish(message(1)).await.unwrap();

            let inbound = broker.receive().await.unwrap().unwrap();
            assert!(broker.receive().await.unwrap().is_none());

            broker.redeliver_inflight().await;
            let redelivered = broker.receive().await.unwrap().unwrap();
            assert_eq!(redelivered.message, inbound.message);
            assert_ne!(redelivered.receipt, inbound.receipt);
        }

        #[tokio::test]
        async fn injected_publish_error_surfaces_once() {
            let broker = InMemoryBroker::new();
            broker.inject_publish_error("broker unavailable").await;

            let err = broker.publish(message(1)).await.unwrap_err();
            assert!(matches!(err, BrokerError::Publish(_)));
            assert_eq!(broker.ready_len().await, 0);

            broker.publish(message(1)).await.unwrap();
            assert_eq!(broker.ready_len().await, 1);
        }
    }
}
