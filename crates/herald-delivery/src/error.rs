//! Error types for the delivery pipeline.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors surfaced by the consumer worker and scheduler.
///
/// Send failures are not errors here: they are modeled as
/// [`crate::sender::SendOutcome`] values and resolved by retry policy.
/// This type covers infrastructure problems around an attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Reading or updating the notification record failed.
    #[error("storage error: {0}")]
    Database(#[from] herald_core::CoreError),

    /// A broker operation failed.
    #[error("broker error: {0}")]
    Broker(#[from] herald_queue::BrokerError),

    /// Invariant violation inside the pipeline.
    #[error("internal error: {0}")]
    Internal(String),
}
