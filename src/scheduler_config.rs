use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Runtime configuration of a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SchedulerConfig {
    /// Concurrency ceiling: maximum simultaneous in-flight transport calls.
    #[validate(range(min = 1, max = 1024))]
    pub max_concurrent: usize,

    /// Minimum time between two dispatch starts.
    #[serde(with = "humantime_serde")]
    pub dispatch_spacing: Duration,

    /// Freshness window of cached reads. Zero disables the cache.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Period of the background sweep that drops expired cache entries.
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub cache_sweep_interval: Duration,

    /// Hard timeout applied to every transport call.
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub request_timeout: Duration,

    #[validate(nested)]
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            dispatch_spacing: Duration::from_millis(100),
            cache_ttl: Duration::from_secs(60),
            cache_sweep_interval: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_dispatch_spacing(mut self, spacing: Duration) -> Self {
        self.dispatch_spacing = spacing;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn non_zero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("duration_must_be_positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_ceiling_is_rejected() {
        let config = SchedulerConfig::default().with_max_concurrent(0);
        let errors = config.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("max_concurrent"));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let config = SchedulerConfig::default().with_request_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_spacing_and_ttl_are_allowed() {
        let config = SchedulerConfig::default()
            .with_dispatch_spacing(Duration::ZERO)
            .with_cache_ttl(Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_nested_retry_policy_is_validated() {
        let config = SchedulerConfig::default().with_retry(RetryPolicy::new(
            2,
            Duration::from_secs(5),
            Duration::from_secs(1),
        ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_humantime_durations() {
        let config: SchedulerConfig = serde_json::from_str(
            r#"{
                "max_concurrent": 2,
                "dispatch_spacing": "100ms",
                "cache_ttl": "1m",
                "cache_sweep_interval": "5m",
                "request_timeout": "20s",
                "retry": {"max_retries": 3, "base_delay": "1s", "max_delay": "30s"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.dispatch_spacing, Duration::from_millis(100));
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 3);
    }
}
