//! Exponential backoff retry policy for failed deliveries.
//!
//! Failed attempts are requeued with a delay of `base_delay * 2^n`,
//! where `n` is the retry count after the failed attempt has been
//! counted. A notification whose retry count reaches the maximum is
//! marked permanently failed instead of being requeued.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::sender::SendOutcome;

/// Retry policy configuration for notification delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries before a notification is marked failed.
    pub max_retries: u32,

    /// Base delay for exponential backoff calculation.
    pub base_delay: Duration,

    /// Maximum delay between retry attempts.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(512),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Whether a notification with this retry count has no attempts left.
    ///
    /// Checked before an attempt as well as after: a redelivered message
    /// whose record already reached the cap is finalized without another
    /// send.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Delay before the attempt following the `retry_count`th failure.
    ///
    /// `retry_count` is the value after the failed attempt was counted,
    /// so the first retry waits `base_delay * 2`, the second
    /// `base_delay * 4`, and so on, capped at `max_delay`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let capped = std::cmp::min(self.base_delay * multiplier, self.max_delay);

        std::cmp::min(apply_jitter(capped, self.jitter_factor), self.max_delay)
    }
}

/// Context for deciding what happens after a delivery attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Retry count after the attempt has been counted.
    pub retry_count: u32,
    /// Outcome of the attempt.
    pub outcome: SendOutcome,
    /// Retry policy to apply.
    pub policy: RetryPolicy,
}

/// Resolution of a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The attempt succeeded; mark the notification sent.
    Sent,
    /// Requeue for another attempt after the given delay.
    Retry {
        /// Backoff delay before the next attempt.
        delay: Duration,
    },
    /// No more attempts; mark the notification failed.
    Failed {
        /// Why delivery was abandoned.
        reason: String,
    },
}

impl RetryContext {
    /// Creates a decision context for a completed attempt.
    pub fn new(retry_count: u32, outcome: SendOutcome, policy: RetryPolicy) -> Self {
        Self { retry_count, outcome, policy }
    }

    /// Resolves the attempt into sent, retry-later, or failed.
    ///
    /// Permanent failures are never retried. Transient failures retry
    /// until the retry count reaches the policy maximum.
    pub fn decide(&self) -> RetryDecision {
        match &self.outcome {
            SendOutcome::Delivered => RetryDecision::Sent,
            SendOutcome::PermanentFailure(reason) => {
                RetryDecision::Failed { reason: format!("permanent failure: {reason}") }
            },
            SendOutcome::TransientFailure(reason) => {
                if self.policy.is_exhausted(self.retry_count) {
                    return RetryDecision::Failed {
                        reason: format!(
                            "retries exhausted after {} attempts: {reason}",
                            self.retry_count
                        ),
                    };
                }

                RetryDecision::Retry { delay: self.policy.backoff_delay(self.retry_count) }
            },
        }
    }
}

/// Applies jitter to a duration to prevent thundering herd effects.
///
/// Randomizes the delay by ±jitter_factor percentage. For example, with
/// jitter_factor=0.25, a 10s delay becomes 7.5s to 12.5s randomly.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
