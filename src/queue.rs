//! Pending-request queue.
//!
//! New entries join at the back. Rate-limited entries are reinserted into the
//! requeued prefix at the front, ordered by submission sequence, so they keep
//! their place ahead of anything submitted after them.

use crate::error::Result;
use crate::key_generator::CacheKey;
use crate::request::{RequestDescriptor, Response};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type Responder = oneshot::Sender<Result<Response>>;

#[derive(Debug)]
pub struct QueueEntry {
    pub id: Uuid,
    /// Submission order; never changes across retries.
    pub seq: u64,
    pub descriptor: Arc<RequestDescriptor>,
    /// Set for reads whose successful response populates the cache.
    pub cache_key: Option<CacheKey>,
    /// Other callers are attached to this entry's settlement.
    pub leads_group: bool,
    pub responder: Responder,
    pub cancel: Option<CancellationToken>,
    /// Rate-limit retries spent so far.
    pub attempts: u32,
    /// Sitting in the queue after a 429.
    pub requeued: bool,
    pub enqueued_at: Instant,
}

impl QueueEntry {
    pub fn new(
        seq: u64,
        descriptor: Arc<RequestDescriptor>,
        cache_key: Option<CacheKey>,
        responder: Responder,
        cancel: Option<CancellationToken>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            descriptor,
            cache_key,
            leads_group: false,
            responder,
            cancel,
            attempts: 0,
            requeued: false,
            enqueued_at: Instant::now(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: VecDeque<QueueEntry>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, entry: QueueEntry) {
        self.entries.push_back(entry);
    }

    /// Put a rate-limited entry back ahead of every fresh entry, behind any
    /// requeued entry that was submitted earlier.
    pub fn requeue(&mut self, mut entry: QueueEntry) {
        entry.requeued = true;
        let position = self
            .entries
            .iter()
            .position(|queued| !queued.requeued || queued.seq > entry.seq)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
    }

    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}
