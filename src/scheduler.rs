//! The request scheduler: response cache, pending queue, rate gate and
//! dispatcher behind one handle.
//!
//! Every submitted request settles exactly once. Reads are answered from the
//! cache when fresh, attached to an identical read already in progress, or
//! queued. Queued entries are dispatched in submission order whenever the
//! rate gate has a free slot and the spacing interval has elapsed. A 429
//! response puts the entry back at the head of the queue after the retry
//! delay, with its slot released in the meantime. Requeued entries stay in
//! submission order among themselves, whatever order their delays expire in.
//!
//! All shared state lives behind one `std::sync::Mutex` that is never held
//! across an `.await`, so each admission pass and each settlement is a short
//! synchronous critical section.

use crate::cache::ResponseCache;
use crate::config_validator::ConfigValidator;
use crate::error::{Result, SchedulerError, TransportError};
use crate::key_generator::{CacheKey, KeyGenerator};
use crate::metrics::{MetricsSnapshot, SchedulerMetrics};
use crate::queue::{QueueEntry, RequestQueue, Responder};
use crate::rate_gate::{Admission, RateGate};
use crate::request::{RequestDescriptor, Response};
use crate::retry::parse_retry_after;
use crate::scheduler_config::SchedulerConfig;
use crate::transport::Transport;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-submission options.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub cancel: Option<CancellationToken>,
    /// Consult and populate the cache for reads.
    pub use_cache: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            cancel: None,
            use_cache: true,
        }
    }
}

impl SubmitOptions {
    pub fn cancellable(token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            ..Self::default()
        }
    }

    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub in_flight: usize,
    pub cached_entries: usize,
    pub metrics: MetricsSnapshot,
}

/// Handle on a submitted request.
#[must_use = "a pending response does nothing unless waited on"]
pub struct PendingResponse {
    state: PendingState,
    cancel: Option<CancellationToken>,
}

enum PendingState {
    Ready(Result<Response>),
    Waiting(oneshot::Receiver<Result<Response>>),
}

impl PendingResponse {
    fn ready(result: Result<Response>) -> Self {
        Self {
            state: PendingState::Ready(result),
            cancel: None,
        }
    }

    fn waiting(receiver: oneshot::Receiver<Result<Response>>, cancel: Option<CancellationToken>) -> Self {
        Self {
            state: PendingState::Waiting(receiver),
            cancel,
        }
    }

    /// True when the request was answered without queueing.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, PendingState::Ready(_))
    }

    pub async fn wait(self) -> Result<Response> {
        let receiver = match self.state {
            PendingState::Ready(result) => return result,
            PendingState::Waiting(receiver) => receiver,
        };

        let settled = match self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(SchedulerError::Cancelled),
                settled = receiver => settled,
            },
            None => receiver.await,
        };

        settled.unwrap_or_else(|_| {
            Err(SchedulerError::Internal(
                "request was dropped without settling".to_string(),
            ))
        })
    }
}

/// Cheaply cloneable handle on one scheduler instance.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: SchedulerConfig,
    cache: ResponseCache,
    metrics: SchedulerMetrics,
    state: Mutex<State>,
}

struct State {
    queue: RequestQueue,
    gate: RateGate,
    /// Callers attached to a read already queued or in flight.
    followers: HashMap<CacheKey, Vec<Responder>>,
    /// Deadline of the armed spacing wake-up, if any.
    wake_at: Option<Instant>,
    next_seq: u64,
}

enum Outcome {
    Success(Response),
    RateLimited(Response),
    Failed(SchedulerError),
    Cancelled,
}

impl Outcome {
    fn classify(
        joined: std::result::Result<std::result::Result<Response, TransportError>, JoinError>,
        timeout: Duration,
    ) -> Self {
        match joined {
            Ok(Ok(response)) if response.is_success() => Outcome::Success(response),
            Ok(Ok(response)) if response.is_rate_limited() => Outcome::RateLimited(response),
            Ok(Ok(response)) => Outcome::Failed(SchedulerError::from_status(response.status, response.data)),
            Ok(Err(TransportError::Timeout)) => Outcome::Failed(SchedulerError::Timeout(timeout)),
            Ok(Err(err)) => Outcome::Failed(err.into()),
            Err(err) => Outcome::Failed(SchedulerError::Internal(format!(
                "transport task failed: {}",
                err
            ))),
        }
    }
}

impl Scheduler {
    pub fn new(transport: Arc<dyn Transport>, config: SchedulerConfig) -> Result<Self> {
        ConfigValidator::validate_scheduler_config(&config)?;

        let state = State {
            queue: RequestQueue::new(),
            gate: RateGate::new(config.max_concurrent, config.dispatch_spacing),
            followers: HashMap::new(),
            wake_at: None,
            next_seq: 0,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                cache: ResponseCache::new(config.cache_ttl),
                metrics: SchedulerMetrics::new(),
                state: Mutex::new(state),
                config,
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Submit a request. Must be called from within a Tokio runtime.
    ///
    /// The cache lookup, coalescing and enqueueing happen before this returns,
    /// so submission order is the order of `submit` calls.
    pub fn submit(&self, descriptor: RequestDescriptor, options: SubmitOptions) -> PendingResponse {
        self.inner.submit(descriptor, options)
    }

    /// Submit and wait for the settlement.
    pub async fn execute(&self, descriptor: RequestDescriptor, options: SubmitOptions) -> Result<Response> {
        self.submit(descriptor, options).wait().await
    }

    /// Periodically drop expired cache entries. The task ends once every
    /// handle on this scheduler has been dropped.
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.cache_sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let evicted = inner.cache.sweep();
                if evicted > 0 {
                    debug!(evicted, remaining = inner.cache.len(), "Swept expired cache entries");
                }
            }
        })
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Drop the cached response for one read, if any.
    pub fn invalidate(&self, descriptor: &RequestDescriptor) -> bool {
        self.inner.cache.invalidate(&KeyGenerator::cache_key(descriptor))
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.lock_state();
        SchedulerStats {
            queued: state.queue.len(),
            in_flight: state.gate.active_count(),
            cached_entries: self.inner.cache.len(),
            metrics: self.inner.metrics.snapshot(),
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(self: &Arc<Self>, descriptor: RequestDescriptor, options: SubmitOptions) -> PendingResponse {
        self.metrics.record_submitted();

        if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            self.metrics.record_cancelled();
            return PendingResponse::ready(Err(SchedulerError::Cancelled));
        }

        let cache_key = (options.use_cache && descriptor.method().is_read() && self.cache.is_enabled())
            .then(|| KeyGenerator::cache_key(&descriptor));
        let descriptor = Arc::new(descriptor);
        let (responder, receiver) = oneshot::channel();

        {
            let mut state = self.lock_state();
            let mut leads_group = false;

            if let Some(key) = &cache_key {
                if let Some(response) = self.cache.lookup(key) {
                    self.metrics.record_cache_hit();
                    debug!(method = %descriptor.method(), path = %descriptor.path(), "Served from cache");
                    return PendingResponse::ready(Ok(response));
                }

                // cancellable reads settle on their own and never share one
                if options.cancel.is_none() {
                    if let Some(followers) = state.followers.get_mut(key) {
                        followers.push(responder);
                        self.metrics.record_coalesced();
                        debug!(method = %descriptor.method(), path = %descriptor.path(), "Attached to identical read in progress");
                        return PendingResponse::waiting(receiver, None);
                    }
                    state.followers.insert(key.clone(), Vec::new());
                    leads_group = true;
                }
            }

            let seq = state.next_seq;
            state.next_seq += 1;

            let mut entry = QueueEntry::new(seq, descriptor, cache_key, responder, options.cancel.clone());
            entry.leads_group = leads_group;
            debug!(
                request_id = %entry.id,
                method = %entry.descriptor.method(),
                path = %entry.descriptor.path(),
                queued = state.queue.len(),
                "Request queued"
            );
            state.queue.push_back(entry);
        }

        self.pump();
        PendingResponse::waiting(receiver, options.cancel)
    }

    /// Admit as many queued entries as the rate gate allows right now.
    fn pump(self: &Arc<Self>) {
        let mut state = self.lock_state();

        loop {
            if state.queue.is_empty() {
                return;
            }

            let now = Instant::now();
            match state.gate.check(now) {
                // the next settlement pumps again
                Admission::Saturated => return,
                Admission::Wait(delay) => {
                    self.arm_wakeup(&mut state, now + delay);
                    return;
                }
                Admission::Ready => {}
            }

            let Some(entry) = state.queue.pop_front() else {
                return;
            };

            if Self::is_abandoned(&state, &entry) {
                self.discard(&mut state, entry);
                continue;
            }

            state.gate.acquire(now);
            self.metrics.record_dispatched();
            debug!(
                request_id = %entry.id,
                method = %entry.descriptor.method(),
                path = %entry.descriptor.path(),
                attempt = entry.attempts + 1,
                waited_ms = now.saturating_duration_since(entry.enqueued_at).as_millis() as u64,
                in_flight = state.gate.active_count(),
                "Dispatching request"
            );

            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.dispatch(entry).await });
        }
    }

    fn arm_wakeup(self: &Arc<Self>, state: &mut State, deadline: Instant) {
        if state.wake_at.is_some_and(|armed| armed <= deadline) {
            return;
        }
        state.wake_at = Some(deadline);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut state = inner.lock_state();
                if state.wake_at == Some(deadline) {
                    state.wake_at = None;
                }
            }
            inner.pump();
        });
    }

    /// Nobody is waiting on the entry any more.
    fn is_abandoned(state: &State, entry: &QueueEntry) -> bool {
        if entry.is_cancelled() {
            return true;
        }
        if !entry.responder.is_closed() {
            return false;
        }

        match (&entry.cache_key, entry.leads_group) {
            (Some(key), true) => state
                .followers
                .get(key)
                .map_or(true, |followers| followers.iter().all(Responder::is_closed)),
            _ => true,
        }
    }

    fn discard(&self, state: &mut State, entry: QueueEntry) {
        if entry.leads_group {
            if let Some(key) = &entry.cache_key {
                state.followers.remove(key);
            }
        }

        self.metrics.record_cancelled();
        debug!(
            request_id = %entry.id,
            method = %entry.descriptor.method(),
            path = %entry.descriptor.path(),
            "Dropping abandoned request before dispatch"
        );
        let _ = entry.responder.send(Err(SchedulerError::Cancelled));
    }

    async fn dispatch(self: Arc<Self>, entry: QueueEntry) {
        let timeout = self.config.request_timeout;
        let transport = Arc::clone(&self.transport);
        let descriptor = Arc::clone(&entry.descriptor);
        let mut call = tokio::spawn(async move { transport.execute(&descriptor).await });

        let token = entry.cancel.clone();
        let cancelled = async move {
            match token {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancelled => {
                call.abort();
                Outcome::Cancelled
            }
            joined = &mut call => Outcome::classify(joined, timeout),
            _ = tokio::time::sleep(timeout) => {
                call.abort();
                Outcome::Failed(SchedulerError::Timeout(timeout))
            }
        };

        self.lock_state().gate.release();

        match outcome {
            Outcome::Success(response) => self.settle(entry, Ok(response)),
            Outcome::RateLimited(response) => self.requeue_or_fail(entry, response),
            Outcome::Failed(err) => self.settle(entry, Err(err)),
            Outcome::Cancelled => self.settle(entry, Err(SchedulerError::Cancelled)),
        }

        self.pump();
    }

    fn requeue_or_fail(self: &Arc<Self>, mut entry: QueueEntry, response: Response) {
        entry.attempts += 1;
        let retry_after = response.header("retry-after").and_then(parse_retry_after);

        match self.config.retry.next_delay(entry.attempts, retry_after) {
            Some(delay) => {
                self.metrics.record_retried();
                warn!(
                    request_id = %entry.id,
                    method = %entry.descriptor.method(),
                    path = %entry.descriptor.path(),
                    attempt = entry.attempts,
                    delay_ms = delay.as_millis() as u64,
                    retry_after = retry_after.is_some(),
                    "Rate limited, requeueing at the head of the queue"
                );

                let inner = Arc::clone(self);
                tokio::spawn(async move { inner.requeue_after(entry, delay).await });
            }
            None => {
                warn!(
                    request_id = %entry.id,
                    method = %entry.descriptor.method(),
                    path = %entry.descriptor.path(),
                    attempts = entry.attempts,
                    retry_after = ?retry_after,
                    "Rate limit retries exhausted"
                );
                let err = SchedulerError::RetriesExhausted {
                    attempts: entry.attempts,
                    status: response.status,
                    data: response.data,
                };
                self.settle(entry, Err(err));
            }
        }
    }

    async fn requeue_after(self: Arc<Self>, entry: QueueEntry, delay: Duration) {
        let cancelled = match entry.cancel.clone() {
            Some(token) => tokio::select! {
                _ = token.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            },
            None => {
                tokio::time::sleep(delay).await;
                false
            }
        };

        if cancelled {
            self.settle(entry, Err(SchedulerError::Cancelled));
            return;
        }

        self.lock_state().queue.requeue(entry);
        self.pump();
    }

    /// Deliver the terminal result to the entry's caller and every follower.
    fn settle(&self, entry: QueueEntry, result: Result<Response>) {
        let followers = {
            let mut state = self.lock_state();

            if let (Some(key), Ok(response)) = (&entry.cache_key, &result) {
                self.cache.store(key.clone(), response.clone());
            }

            match (&entry.cache_key, entry.leads_group) {
                (Some(key), true) => state.followers.remove(key).unwrap_or_default(),
                _ => Vec::new(),
            }
        };

        match &result {
            Ok(response) => {
                self.metrics.record_succeeded();
                debug!(
                    request_id = %entry.id,
                    method = %entry.descriptor.method(),
                    path = %entry.descriptor.path(),
                    status = response.status,
                    followers = followers.len(),
                    "Request succeeded"
                );
            }
            Err(SchedulerError::Cancelled) => {
                self.metrics.record_cancelled();
                debug!(request_id = %entry.id, path = %entry.descriptor.path(), "Request cancelled");
            }
            Err(err) => {
                self.metrics.record_failed();
                debug!(
                    request_id = %entry.id,
                    method = %entry.descriptor.method(),
                    path = %entry.descriptor.path(),
                    error = %err,
                    "Request failed"
                );
            }
        }

        for follower in followers {
            let _ = follower.send(result.clone());
        }
        let _ = entry.responder.send(result);
    }
}
