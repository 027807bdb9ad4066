//! Notification delivery pipeline.
//!
//! Consumes queued notifications, performs channel delivery attempts,
//! and resolves each attempt through an exponential backoff retry
//! policy with a bounded number of retries. Delivery state lives in
//! the notification record; queue messages are disposable triggers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod retry;
pub mod scheduler;
pub mod sender;
pub mod store;
pub mod worker;

pub use engine::{DeliveryConfig, DeliveryEngine};
pub use error::{DeliveryError, Result};
pub use retry::{RetryContext, RetryDecision, RetryPolicy};
pub use scheduler::RetryScheduler;
pub use sender::{ChannelSender, Dispatcher, GatewaySender, SendOutcome};
pub use store::{NotificationStore, PostgresNotificationStore};
pub use worker::{ConsumerWorker, ProcessOutcome, StatsSnapshot, WorkerStats};
