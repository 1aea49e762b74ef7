//! Retry Policy (§4.6): exponential backoff with a capped delay and
//! kind-based retryability.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Options controlling backoff delay and the retry cap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicyOptions {
    pub max_retry_count: u32,
    pub initial_delay_milliseconds: u64,
    pub backoff_multiplier: f64,
    pub max_delay_milliseconds: u64,
}

impl Default for RetryPolicyOptions {
    fn default() -> Self {
        Self {
            max_retry_count: 3,
            initial_delay_milliseconds: 100,
            backoff_multiplier: 2.0,
            max_delay_milliseconds: 30_000,
        }
    }
}

/// A closed classification of task-executor failures (§4.6 ADDED). Task
/// executors classify their own errors into this enum at the boundary; the
/// Retry Policy never inspects error text itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The operation was cancelled; never retried.
    Cancelled,
    /// A transport-level transient failure: connection error, DNS failure,
    /// timeout. The only kind retried by default.
    TransportTransient,
    /// Anything else. Not retried by default.
    Other,
}

/// `delay(n) = min(initial * multiplier^(n-1), max)` for `n >= 1`; `delay(0) = 0`.
#[must_use]
pub fn delay(options: &RetryPolicyOptions, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }
    let exponent = f64::from(attempt - 1);
    let scaled =
        (options.initial_delay_milliseconds as f64) * options.backoff_multiplier.powf(exponent);
    let capped = scaled.min(options.max_delay_milliseconds as f64);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Duration::from_millis(capped.round() as u64)
}

/// Whether attempt number `attempt` (1-indexed, the attempt about to be made)
/// should proceed, given the prior attempt failed with `kind`.
#[must_use]
pub fn should_retry(options: &RetryPolicyOptions, attempt: u32, kind: ErrorKind) -> bool {
    if attempt > options.max_retry_count {
        debug!(attempt, max = options.max_retry_count, "retry cap reached");
        return false;
    }
    match kind {
        ErrorKind::Cancelled => false,
        ErrorKind::TransportTransient => true,
        ErrorKind::Other => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s7_options() -> RetryPolicyOptions {
        RetryPolicyOptions {
            max_retry_count: 10,
            initial_delay_milliseconds: 100,
            backoff_multiplier: 2.0,
            max_delay_milliseconds: 1000,
        }
    }

    #[test]
    fn s7_delay_sequence() {
        let options = s7_options();
        let expected = [100, 200, 400, 800, 1000, 1000];
        for (i, expected_ms) in expected.iter().enumerate() {
            let attempt = (i + 1) as u32;
            assert_eq!(delay(&options, attempt).as_millis(), *expected_ms as u128);
        }
    }

    #[test]
    fn delay_zero_is_zero() {
        assert_eq!(delay(&s7_options(), 0), Duration::from_millis(0));
    }

    #[test]
    fn retry_cap_rejects_any_kind_past_max() {
        let options = RetryPolicyOptions {
            max_retry_count: 2,
            ..s7_options()
        };
        for kind in [
            ErrorKind::Cancelled,
            ErrorKind::TransportTransient,
            ErrorKind::Other,
        ] {
            assert!(!should_retry(&options, 3, kind));
        }
    }

    #[test]
    fn only_transport_transient_retries_by_default() {
        let options = s7_options();
        assert!(should_retry(&options, 1, ErrorKind::TransportTransient));
        assert!(!should_retry(&options, 1, ErrorKind::Other));
        assert!(!should_retry(&options, 1, ErrorKind::Cancelled));
    }
}
