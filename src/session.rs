//! Bearer-token storage and session lifecycle events.

use serde::Serialize;
use std::sync::{PoisonError, RwLock};

/// Key-value storage of the bearer token, read on every outgoing request.
pub trait TokenStore: Send + Sync {
    fn read(&self) -> Option<String>;
    fn store(&self, token: String);
    /// Remove the token, returning it if one was held.
    fn clear(&self) -> Option<String>;
}

/// In-process [`TokenStore`].
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn read(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, token: String) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn clear(&self) -> Option<String> {
        self.token
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Emitted by the façade for whoever owns the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The backend rejected the credentials; the token store has been cleared.
    Unauthenticated { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_token_store() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.read(), None);

        store.store("abc123".to_string());
        assert_eq!(store.read().as_deref(), Some("abc123"));

        assert_eq!(store.clear().as_deref(), Some("abc123"));
        assert_eq!(store.read(), None);
        assert_eq!(store.clear(), None);
    }

    #[test]
    fn test_with_token() {
        let store = MemoryTokenStore::with_token("seeded");
        assert_eq!(store.read().as_deref(), Some("seeded"));
    }

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::Unauthenticated {
            path: "/vehicles".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "unauthenticated");
        assert_eq!(json["path"], "/vehicles");
    }
}
