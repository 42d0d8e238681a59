//! The network boundary of the scheduler.

use crate::config_validator::ConfigValidator;
use crate::error::{SchedulerError, TransportError};
use crate::request::{decode_body, FormPart, FormValue, RequestBody, RequestDescriptor, Response};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use std::collections::BTreeMap;
use std::time::Duration;

/// Performs one HTTP call.
///
/// Every HTTP status, including 4xx and 5xx, is reported as `Ok(Response)`;
/// `Err` is reserved for failures where no response was received.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Response, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SchedulerError> {
        let base_url = ConfigValidator::validate_base_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, SchedulerError> {
        let base_url = ConfigValidator::validate_base_url(base_url)?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join `path` onto the base URL, keeping the base path prefix.
    pub fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|e| TransportError::InvalidUrl(e.to_string()));
        }

        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| TransportError::InvalidUrl(e.to_string()))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Response, TransportError> {
        let url = self.url_for(request.path())?;
        let mut builder = self.client.request(request.method().into(), url);

        if !request.params().is_empty() {
            builder = builder.query(request.params());
        }
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body() {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Multipart(parts)) => builder.multipart(build_form(parts)?),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let bytes = response.bytes().await?;

        Ok(Response {
            status,
            data: decode_body(&bytes),
            headers,
        })
    }
}

fn build_form(parts: &[FormPart]) -> Result<Form, TransportError> {
    parts.iter().try_fold(Form::new(), |form, part| match &part.value {
        FormValue::Text(text) => Ok(form.text(part.name.clone(), text.clone())),
        FormValue::File {
            file_name,
            content_type,
            bytes,
        } => {
            let mut file = Part::bytes(bytes.clone()).file_name(file_name.clone());
            if let Some(content_type) = content_type {
                file = file.mime_str(content_type)?;
            }
            Ok(form.part(part.name.clone(), file))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> ReqwestTransport {
        ReqwestTransport::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_url_keeps_base_path() {
        let transport = transport("http://localhost:8000/api");
        assert_eq!(
            transport.url_for("/vehicles").unwrap().as_str(),
            "http://localhost:8000/api/vehicles"
        );
        assert_eq!(
            transport.url_for("incidents/4").unwrap().as_str(),
            "http://localhost:8000/api/incidents/4"
        );
    }

    #[test]
    fn test_url_with_trailing_slash_base() {
        let transport = transport("http://localhost:8000/api/");
        assert_eq!(
            transport.url_for("/documents").unwrap().as_str(),
            "http://localhost:8000/api/documents"
        );
    }

    #[test]
    fn test_absolute_url_is_used_as_is() {
        let transport = transport("http://localhost:8000/api");
        assert_eq!(
            transport.url_for("https://files.example.com/a.pdf").unwrap().as_str(),
            "https://files.example.com/a.pdf"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = ReqwestTransport::new("not a url", Duration::from_secs(5));
        assert!(matches!(result, Err(SchedulerError::Configuration(_))));
    }

    #[test]
    fn test_build_form_rejects_bad_mime() {
        let parts = vec![FormPart::file("file", "a.pdf", Some("not a mime"), vec![1, 2])];
        assert!(build_form(&parts).is_err());

        let parts = vec![
            FormPart::text("title", "Registration"),
            FormPart::file("file", "a.pdf", Some("application/pdf"), vec![1, 2]),
        ];
        assert!(build_form(&parts).is_ok());
    }
}
