//! Key generation utilities for response caching.

use crate::request::{Method, RequestDescriptor};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a request for caching and read coalescing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives [`CacheKey`]s from (method, path, serialized params).
pub struct KeyGenerator;

impl KeyGenerator {
    pub fn cache_key(descriptor: &RequestDescriptor) -> CacheKey {
        Self::key_for(descriptor.method(), descriptor.path(), descriptor.params())
    }

    /// Params live in an ordered map, so insertion order never changes the key.
    pub fn key_for(method: Method, path: &str, params: &BTreeMap<String, String>) -> CacheKey {
        let params = serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string());
        CacheKey(format!(
            "cache:{}:{}:{}",
            method,
            Self::normalize_path(path),
            params
        ))
    }

    /// Trim a trailing slash so `/vehicles/` and `/vehicles` share an entry.
    pub fn normalize_path(path: &str) -> &str {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    }
}
