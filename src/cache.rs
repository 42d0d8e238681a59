//! Time-bounded response cache for read requests.
//!
//! Entries are evicted lazily on lookup once they are older than the TTL, and
//! in bulk by [`ResponseCache::sweep`]. There is no size bound: memory grows
//! with the number of distinct read identities seen within one TTL window.

use crate::key_generator::CacheKey;
use crate::request::Response;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    response: Response,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) > ttl
    }
}

#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ResponseCache {
    /// A zero TTL disables caching entirely.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Return a fresh response, evicting the entry if it has expired.
    pub fn lookup(&self, key: &CacheKey) -> Option<Response> {
        if !self.is_enabled() {
            return None;
        }

        let now = Instant::now();
        let mut entries = self.entries();

        match entries.get(key) {
            Some(entry) if entry.is_stale(now, self.ttl) => {
                entries.remove(key);
                tracing::debug!(key = %key, "Evicted stale cache entry");
                None
            }
            Some(entry) => Some(entry.response.clone()),
            None => None,
        }
    }

    /// Unconditionally overwrite the entry for `key`.
    pub fn store(&self, key: CacheKey, response: Response) {
        if !self.is_enabled() {
            return;
        }

        self.entries().insert(
            key,
            CacheEntry {
                response,
                stored_at: Instant::now(),
            },
        );
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let initial_count = entries.len();

        entries.retain(|_, entry| !entry.is_stale(now, self.ttl));

        initial_count - entries.len()
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_generator::KeyGenerator;
    use crate::request::{Method, RequestDescriptor};
    use serde_json::json;

    fn key(path: &str) -> CacheKey {
        KeyGenerator::cache_key(&RequestDescriptor::new(Method::Get, path))
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_within_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(30));
        cache.store(key("/vehicles"), Response::new(200, json!([1, 2, 3])));

        tokio::time::advance(Duration::from_secs(29)).await;

        let cached = cache.lookup(&key("/vehicles")).unwrap();
        assert_eq!(cached.data, json!([1, 2, 3]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_evicted_on_lookup() {
        let cache = ResponseCache::new(Duration::from_secs(30));
        cache.store(key("/vehicles"), Response::new(200, json!([])));

        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(cache.lookup(&key("/vehicles")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_overwrites_and_refreshes() {
        let cache = ResponseCache::new(Duration::from_secs(10));
        cache.store(key("/incidents"), Response::new(200, json!({"v": 1})));

        tokio::time::advance(Duration::from_secs(8)).await;
        cache.store(key("/incidents"), Response::new(200, json!({"v": 2})));

        tokio::time::advance(Duration::from_secs(8)).await;
        let cached = cache.lookup(&key("/incidents")).unwrap();
        assert_eq!(cached.data, json!({"v": 2}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_stale_entries() {
        let cache = ResponseCache::new(Duration::from_secs(10));
        cache.store(key("/old"), Response::new(200, json!(null)));

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.store(key("/new"), Response::new(200, json!(null)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(&key("/new")).is_some());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = ResponseCache::new(Duration::ZERO);
        cache.store(key("/vehicles"), Response::new(200, json!([])));

        assert!(!cache.is_enabled());
        assert!(cache.lookup(&key("/vehicles")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.store(key("/a"), Response::new(200, json!(1)));
        cache.store(key("/b"), Response::new(200, json!(2)));

        assert!(cache.invalidate(&key("/a")));
        assert!(!cache.invalidate(&key("/a")));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
