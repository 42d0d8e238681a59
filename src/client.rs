//! Request façade: the single entry point UI code uses.
//!
//! Every verb builds a [`RequestDescriptor`], attaches the bearer token and
//! routes through the shared [`Scheduler`]. A 401 clears the token store and
//! broadcasts [`SessionEvent::Unauthenticated`] once per cleared token, so
//! callers sharing one rejected read raise a single event. The caller still
//! receives the original error.

use crate::error::Result;
use crate::request::{Method, RequestBody, RequestConfig, RequestDescriptor, Response};
use crate::scheduler::{Scheduler, SchedulerStats, SubmitOptions};
use crate::session::{SessionEvent, TokenStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

const SESSION_EVENT_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct ApiClient {
    scheduler: Scheduler,
    tokens: Arc<dyn TokenStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    pub fn new(scheduler: Scheduler, tokens: Arc<dyn TokenStore>) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            scheduler,
            tokens,
            events,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Observe session lifecycle events such as `Unauthenticated`.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub async fn get(&self, path: &str, config: RequestConfig) -> Result<Response> {
        self.request(Method::Get, path, None, config).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        config: RequestConfig,
    ) -> Result<Response> {
        self.request(Method::Post, path, Some(body.into()), config)
            .await
    }

    pub async fn put(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        config: RequestConfig,
    ) -> Result<Response> {
        self.request(Method::Put, path, Some(body.into()), config)
            .await
    }

    pub async fn delete(&self, path: &str, config: RequestConfig) -> Result<Response> {
        self.request(Method::Delete, path, None, config).await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        config: RequestConfig,
    ) -> Result<Response> {
        let descriptor = self.build_descriptor(method, path, body, &config);
        let options = SubmitOptions {
            cancel: config.cancel,
            use_cache: !config.skip_cache,
        };

        info!(
            target: "request_scheduler::client",
            method = %method,
            path = %path,
            authenticated = descriptor.header("authorization").is_some(),
            "Outgoing request"
        );

        let result = self.scheduler.execute(descriptor, options).await;

        match &result {
            Ok(response) => info!(
                target: "request_scheduler::client",
                method = %method,
                path = %path,
                status = response.status,
                "Request completed"
            ),
            Err(err) => {
                warn!(
                    target: "request_scheduler::client",
                    method = %method,
                    path = %path,
                    status = ?err.status(),
                    error = %err,
                    "Request failed"
                );
                if err.is_unauthorized() {
                    self.handle_unauthenticated(path);
                }
            }
        }

        result
    }

    fn build_descriptor(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        config: &RequestConfig,
    ) -> RequestDescriptor {
        let mut descriptor = RequestDescriptor::new(method, path)
            .with_params(config.params.clone())
            .with_headers(config.headers.clone());

        if let Some(body) = body {
            descriptor = descriptor.with_body(body);
        }

        if descriptor.header("authorization").is_none() {
            if let Some(token) = self.tokens.read() {
                descriptor = descriptor.with_header("authorization", format!("Bearer {}", token));
            }
        }

        descriptor
    }

    fn handle_unauthenticated(&self, path: &str) {
        // already signed out by an earlier rejection
        if self.tokens.clear().is_none() {
            return;
        }

        warn!(
            target: "request_scheduler::client",
            path = %path,
            "Credentials rejected, session cleared"
        );
        // no subscribers is fine
        let _ = self.events.send(SessionEvent::Unauthenticated {
            path: path.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SchedulerError, TransportError};
    use crate::scheduler_config::SchedulerConfig;
    use crate::session::MemoryTokenStore;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every descriptor and answers 401 for `/private`.
    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<RequestDescriptor>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn execute(&self, request: &RequestDescriptor) -> std::result::Result<Response, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            if request.path() == "/private" {
                return Ok(Response::new(401, json!({"message": "Unauthenticated."})));
            }
            Ok(Response::new(200, json!({"ok": true})))
        }
    }

    fn client(token: Option<&str>) -> (ApiClient, Arc<RecordingTransport>, Arc<MemoryTokenStore>) {
        let transport = Arc::new(RecordingTransport::default());
        let scheduler = Scheduler::new(transport.clone(), SchedulerConfig::default()).unwrap();
        let tokens = Arc::new(match token {
            Some(token) => MemoryTokenStore::with_token(token),
            None => MemoryTokenStore::new(),
        });
        (ApiClient::new(scheduler, tokens.clone()), transport, tokens)
    }

    #[tokio::test(start_paused = true)]
    async fn test_bearer_token_is_attached() {
        let (client, transport, _tokens) = client(Some("secret"));

        client.get("/vehicles", RequestConfig::new()).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].header("authorization"), Some("Bearer secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_token_no_header() {
        let (client, transport, _tokens) = client(None);

        client.delete("/incidents/3", RequestConfig::new()).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].method(), Method::Delete);
        assert_eq!(seen[0].header("authorization"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_authorization_header_wins() {
        let (client, transport, _tokens) = client(Some("secret"));

        client
            .get("/vehicles", RequestConfig::new().header("Authorization", "Basic abc"))
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].header("authorization"), Some("Basic abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_carries_body_and_params() {
        let (client, transport, _tokens) = client(None);

        client
            .post(
                "/incidents",
                json!({"title": "Flat tyre"}),
                RequestConfig::new().param("notify", "true"),
            )
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].body(), Some(&RequestBody::Json(json!({"title": "Flat tyre"}))));
        assert_eq!(seen[0].params().get("notify").map(String::as_str), Some("true"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_clears_token_and_notifies() {
        let (client, _transport, tokens) = client(Some("expired"));
        let mut events = client.subscribe();

        let err = client.get("/private", RequestConfig::new()).await.unwrap_err();

        assert!(matches!(err, SchedulerError::Status { status: 401, .. }));
        assert_eq!(tokens.read(), None);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Unauthenticated {
                path: "/private".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_rejection_emits_one_event() {
        let (client, transport, tokens) = client(Some("expired"));
        let mut events = client.subscribe();

        let (first, second) = tokio::join!(
            client.get("/private", RequestConfig::new()),
            client.get("/private", RequestConfig::new())
        );

        assert_eq!(first.unwrap_err().status(), Some(401));
        assert_eq!(second.unwrap_err().status(), Some(401));
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
        assert_eq!(tokens.read(), None);

        assert!(events.try_recv().is_ok());
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_without_token_is_silent() {
        let (client, _transport, _tokens) = client(None);
        let mut events = client.subscribe();

        let err = client.get("/private", RequestConfig::new()).await.unwrap_err();

        assert!(err.is_unauthorized());
        assert!(events.try_recv().is_err());
    }
}
