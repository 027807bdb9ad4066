//! Property tests for the retry policy.

use std::time::Duration;

use herald_delivery::{RetryContext, RetryDecision, RetryPolicy, SendOutcome};
use proptest::prelude::*;

fn policy(max_retries: u32, base_secs: u64, max_secs: u64, jitter: f64) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_secs(base_secs),
        max_delay: Duration::from_secs(max_secs),
        jitter_factor: jitter,
    }
}

proptest! {
    #[test]
    fn backoff_never_exceeds_cap(
        retry_count in 0u32..64,
        base_secs in 1u64..16,
        max_secs in 1u64..3600,
        jitter in 0.0f64..1.0,
    ) {
        let policy = policy(3, base_secs, max_secs, jitter);
        prop_assert!(policy.backoff_delay(retry_count) <= policy.max_delay);
    }

    #[test]
    fn backoff_without_jitter_is_monotone(retry_count in 0u32..63) {
        let policy = policy(3, 1, 86_400, 0.0);
        prop_assert!(
            policy.backoff_delay(retry_count) <= policy.backoff_delay(retry_count + 1)
        );
    }

    #[test]
    fn backoff_without_jitter_doubles_below_cap(retry_count in 0u32..9) {
        let policy = policy(3, 1, 86_400, 0.0);
        prop_assert_eq!(
            policy.backoff_delay(retry_count),
            Duration::from_secs(1 << retry_count)
        );
    }

    #[test]
    fn transient_failures_never_retry_past_max(
        retry_count in 0u32..128,
        max_retries in 1u32..16,
    ) {
        let context = RetryContext::new(
            retry_count,
            SendOutcome::TransientFailure("boom".to_string()),
            policy(max_retries, 1, 512, 0.0),
        );

        match context.decide() {
            RetryDecision::Retry { .. } => prop_assert!(retry_count < max_retries),
            RetryDecision::Failed { .. } => prop_assert!(retry_count >= max_retries),
            RetryDecision::Sent => prop_assert!(false, "transient failure cannot resolve to sent"),
        }
    }

    #[test]
    fn permanent_failures_always_fail(retry_count in 0u32..128) {
        let context = RetryContext::new(
            retry_count,
            SendOutcome::PermanentFailure("rejected".to_string()),
            RetryPolicy::default(),
        );

        prop_assert!(
            matches!(context.decide(), RetryDecision::Failed { .. }),
            "permanent failure must resolve to Failed"
        );
    }

    #[test]
    fn delivered_always_resolves_sent(retry_count in 0u32..128) {
        let context =
            RetryContext::new(retry_count, SendOutcome::Delivered, RetryPolicy::default());

        prop_assert_eq!(context.decide(), RetryDecision::Sent);
    }

    #[test]
    fn jitter_stays_within_factor(jitter in 0.0f64..1.0) {
        let policy = policy(3, 10, 86_400, jitter);
        let delay = policy.backoff_delay(0).as_secs_f64();

        // Base delay is 10s at retry_count 0.
        prop_assert!(delay >= 10.0 * (1.0 - jitter) - 1e-6);
        prop_assert!(delay <= 10.0 * (1.0 + jitter) + 1e-6);
    }
}
