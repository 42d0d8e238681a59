use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors a caller can receive from the scheduler or the request façade.
///
/// The type is `Clone` because one settlement is fanned out to every caller
/// coalesced onto the same read.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("{message}")]
    Status {
        status: u16,
        data: Value,
        message: String,
    },

    #[error("rate limit retries exhausted after {attempts} attempts (last status {status})")]
    RetriesExhausted {
        attempts: u32,
        status: u16,
        data: Value,
    },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Build the rejection for a settled, non-successful HTTP response.
    pub fn from_status(status: u16, data: Value) -> Self {
        SchedulerError::Status {
            status,
            data,
            message: format!("Request failed with status code {}", status),
        }
    }

    /// HTTP status carried by the error, if the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            SchedulerError::Status { status, .. } => Some(*status),
            SchedulerError::RetriesExhausted { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body carried by the error.
    pub fn data(&self) -> Option<&Value> {
        match self {
            SchedulerError::Status { data, .. } => Some(data),
            SchedulerError::RetriesExhausted { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse::from_scheduler_error(self)
    }
}

/// Errors raised by a [`Transport`](crate::transport::Transport) before any
/// HTTP response is available.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport timed out")]
    Timeout,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

impl From<TransportError> for SchedulerError {
    fn from(err: TransportError) -> Self {
        match err {
            // the client-level timeout has no duration attached
            TransportError::Timeout => SchedulerError::Transport(err.to_string()),
            TransportError::InvalidUrl(msg) => SchedulerError::InvalidRequest(msg),
            other => SchedulerError::Transport(other.to_string()),
        }
    }
}

/// Serializable rejection shape handed to UI code: `{status, data, message}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: Option<u16>,
    pub data: Value,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: Option<u16>, data: Value, message: &str) -> Self {
        Self {
            status,
            data,
            message: message.to_string(),
        }
    }

    pub fn from_scheduler_error(err: &SchedulerError) -> Self {
        Self::new(
            err.status(),
            err.data().cloned().unwrap_or(Value::Null),
            &err.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_error_message() {
        let err = SchedulerError::from_status(404, json!({"message": "Vehicle not found"}));
        assert_eq!(err.to_string(), "Request failed with status code 404");
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_unauthorized_detection() {
        let err = SchedulerError::from_status(401, Value::Null);
        assert!(err.is_unauthorized());
        assert!(!SchedulerError::Cancelled.is_unauthorized());
    }

    #[test]
    fn test_error_response_carries_original_body() {
        let err = SchedulerError::from_status(422, json!({"errors": ["plate is required"]}));
        let response = err.to_error_response();

        assert_eq!(response.status, Some(422));
        assert_eq!(response.data["errors"][0], "plate is required");

        let body = serde_json::to_string(&response).unwrap();
        assert!(body.contains("Request failed with status code 422"));
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: SchedulerError = TransportError::InvalidUrl("no host".to_string()).into();
        assert!(matches!(err, SchedulerError::InvalidRequest(_)));

        let err: SchedulerError = TransportError::Connect("refused".to_string()).into();
        assert!(matches!(err, SchedulerError::Transport(_)));
        assert_eq!(err.status(), None);
    }
}
