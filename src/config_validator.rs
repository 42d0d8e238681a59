use crate::error::SchedulerError;
use crate::scheduler_config::SchedulerConfig;
use reqwest::Url;
use validator::{Validate, ValidationErrors};

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the API base URL
    pub fn validate_base_url(url: &str) -> Result<Url, SchedulerError> {
        if url.is_empty() {
            return Err(SchedulerError::Configuration(
                "API base URL cannot be empty".to_string(),
            ));
        }

        let parsed = Url::parse(url).map_err(|e| {
            SchedulerError::Configuration(format!("Invalid API base URL '{}': {}", url, e))
        })?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(SchedulerError::Configuration(
                "API base URL must start with 'http://' or 'https://'".to_string(),
            ));
        }

        if parsed.host_str().is_none() {
            return Err(SchedulerError::Configuration(
                "API base URL must include a host".to_string(),
            ));
        }

        Ok(parsed)
    }

    /// Validates scheduler settings
    pub fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), SchedulerError> {
        config
            .validate()
            .map_err(|errors| SchedulerError::Configuration(Self::describe(&errors)))
    }

    fn describe(errors: &ValidationErrors) -> String {
        let mut fields: Vec<String> = errors
            .errors()
            .keys()
            .map(|field| field.to_string())
            .collect();
        fields.sort();
        format!("invalid scheduler settings: {}", fields.join(", "))
    }
}
