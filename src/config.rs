use crate::retry::RetryPolicy;
use crate::scheduler_config::SchedulerConfig;
use envconfig::Envconfig;
use std::time::Duration;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Base URL every request path is joined onto
    #[envconfig(from = "API_BASE_URL", default = "http://127.0.0.1:8000/api")]
    pub api_base_url: String,

    /// Maximum simultaneous in-flight requests
    #[envconfig(from = "MAX_CONCURRENT_REQUESTS", default = "4")]
    pub max_concurrent_requests: usize,

    /// Minimum spacing between dispatch starts in milliseconds
    #[envconfig(from = "DISPATCH_SPACING_MS", default = "100")]
    pub dispatch_spacing_ms: u64,

    /// Freshness window of cached GET responses in seconds (0 disables)
    #[envconfig(from = "CACHE_TTL_SECS", default = "60")]
    pub cache_ttl_secs: u64,

    /// Cache sweep interval in seconds
    #[envconfig(from = "CACHE_SWEEP_INTERVAL_SECS", default = "120")]
    pub cache_sweep_interval_secs: u64,

    /// Hard per-request timeout in seconds
    #[envconfig(from = "REQUEST_TIMEOUT_SECS", default = "30")]
    pub request_timeout_secs: u64,

    /// Retries allowed for rate-limited requests
    #[envconfig(from = "MAX_RETRIES", default = "5")]
    pub max_retries: u32,

    /// First retry backoff in milliseconds when no Retry-After is sent
    #[envconfig(from = "RETRY_BASE_DELAY_MS", default = "1000")]
    pub retry_base_delay_ms: u64,

    /// Retry backoff ceiling in seconds
    #[envconfig(from = "RETRY_MAX_DELAY_SECS", default = "60")]
    pub retry_max_delay_secs: u64,

    /// Longest Retry-After in seconds the scheduler will wait out
    #[envconfig(from = "RETRY_AFTER_MAX_SECS", default = "300")]
    pub retry_after_max_secs: u64,

    /// Log level for the request_scheduler target
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Typed scheduler settings derived from the environment
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent_requests,
            dispatch_spacing: Duration::from_millis(self.dispatch_spacing_ms),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_sweep_interval: Duration::from_secs(self.cache_sweep_interval_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry: RetryPolicy::new(
                self.max_retries,
                Duration::from_millis(self.retry_base_delay_ms),
                Duration::from_secs(self.retry_max_delay_secs),
            )
            .with_max_retry_after(Duration::from_secs(self.retry_after_max_secs)),
        }
    }
}
