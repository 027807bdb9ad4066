//! Durable queue transport for notification delivery.
//!
//! Publishes notification snapshots to a Redis Stream and hands them to
//! consumer-group workers one at a time with explicit acknowledgment.
//! The [`broker::QueueBroker`] trait is the seam: the gateway and the
//! delivery workers only ever see the trait, so tests swap in the
//! in-memory broker without touching Redis.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod error;
pub mod message;

pub use broker::{memory::InMemoryBroker, InboundMessage, QueueBroker, Receipt, RedisBroker};
pub use error::{BrokerError, Result};
pub use message::QueueMessage;
