//! Error types for queue broker operations.

use thiserror::Error;

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors surfaced by queue broker implementations.
///
/// Publish failures must reach the caller: a submitter that cannot
/// enqueue has to know the record is stuck pending with nothing
/// scheduled.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Establishing or refreshing the broker connection failed.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// Publishing a message failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Receiving a message failed.
    #[error("consume failed: {0}")]
    Consume(String),

    /// Acknowledging a message failed.
    #[error("acknowledge failed: {0}")]
    Acknowledge(String),

    /// Message payload could not be encoded or decoded.
    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
