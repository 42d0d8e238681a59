//! Retry policy for rate-limited (HTTP 429) responses.
//!
//! A rate-limited entry is requeued at the head of the queue after a delay.
//! The delay comes from the `Retry-After` header when the backend sends one,
//! otherwise from an exponential backoff capped at `max_delay`. Once
//! `max_retries` requeues have been spent, or the backend asks for a wait
//! longer than `max_retry_after`, the entry fails terminally.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Upper bound on the backoff exponent; keeps the shift well inside `u32`.
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_backoff_bounds"))]
pub struct RetryPolicy {
    /// Requeues allowed before the entry fails with `RetriesExhausted`.
    #[validate(range(max = 100))]
    pub max_retries: u32,
    /// Backoff for the first retry when no `Retry-After` header is present.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Ceiling for the computed backoff.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Longest `Retry-After` worth waiting for; anything above fails the entry.
    #[serde(with = "humantime_serde", default = "default_max_retry_after")]
    pub max_retry_after: Duration,
}

fn default_max_retry_after() -> Duration {
    Duration::from_secs(300)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retry_after: default_max_retry_after(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            max_retry_after: default_max_retry_after(),
        }
    }

    pub fn with_max_retry_after(mut self, max_retry_after: Duration) -> Self {
        self.max_retry_after = max_retry_after;
        self
    }

    /// Delay before retry number `attempt` (1-based), or `None` when the
    /// retry budget is spent or the backend's wait exceeds `max_retry_after`.
    pub fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }

        // The backend's advice wins: retrying earlier only earns another 429.
        if let Some(delay) = retry_after {
            return (delay <= self.max_retry_after).then_some(delay);
        }

        Some(self.backoff(attempt))
    }

    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

fn validate_backoff_bounds(policy: &RetryPolicy) -> Result<(), ValidationError> {
    if policy.base_delay > policy.max_delay {
        return Err(ValidationError::new("base_delay_exceeds_max_delay"));
    }
    Ok(())
}

/// Parse a `Retry-After` value given in (possibly fractional) seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_millis(500), Duration::from_secs(3))
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.next_delay(1, None), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(2, None), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(3, None), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(4, None), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = policy();
        assert_eq!(
            policy.next_delay(1, Some(Duration::from_secs(2))),
            Some(Duration::from_secs(2))
        );
        // honoured even above the backoff ceiling
        assert_eq!(
            policy.next_delay(2, Some(Duration::from_secs(10))),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_retry_after_above_ceiling_is_terminal() {
        let policy = policy().with_max_retry_after(Duration::from_secs(30));
        assert_eq!(
            policy.next_delay(1, Some(Duration::from_secs(30))),
            Some(Duration::from_secs(30))
        );
        assert!(policy.next_delay(1, Some(Duration::from_secs(86400))).is_none());
    }

    #[test]
    fn test_budget_exhaustion() {
        let policy = policy();
        assert!(policy.next_delay(5, None).is_none());
        assert!(policy.next_delay(5, Some(Duration::from_secs(1))).is_none());

        let no_retries = RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(1));
        assert!(no_retries.next_delay(1, None).is_none());
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(64), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("1.5"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("-3"), None);
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_validation() {
        assert!(policy().validate().is_ok());

        let inverted = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(1));
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_humantime_round_trip() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"max_retries": 3, "base_delay": "250ms", "max_delay": "30s"}"#,
        )
        .unwrap();

        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_retry_after, Duration::from_secs(300));

        let policy: RetryPolicy = serde_json::from_str(
            r#"{"max_retries": 3, "base_delay": "1s", "max_delay": "30s", "max_retry_after": "2m"}"#,
        )
        .unwrap();
        assert_eq!(policy.max_retry_after, Duration::from_secs(120));
    }
}
