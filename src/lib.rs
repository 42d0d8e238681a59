pub mod cache;
pub mod client;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod key_generator;
pub mod metrics;
pub mod queue;
pub mod rate_gate;
pub mod request;
pub mod retry;
pub mod scheduler;
pub mod scheduler_config;
pub mod session;
pub mod transport;

pub use client::ApiClient;
pub use config::Config;
pub use error::{ErrorResponse, Result, SchedulerError, TransportError};
pub use request::{FormPart, Method, RequestBody, RequestConfig, RequestDescriptor, Response};
pub use retry::RetryPolicy;
pub use scheduler::{PendingResponse, Scheduler, SchedulerStats, SubmitOptions};
pub use scheduler_config::SchedulerConfig;
pub use session::{MemoryTokenStore, SessionEvent, TokenStore};
pub use transport::{ReqwestTransport, Transport};
pub use tokio_util::sync::CancellationToken;
