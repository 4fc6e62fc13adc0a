//! Key-value capability over the host storage.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

/// Storage backend error.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("storage host is unavailable")]
    Unavailable,
    #[error("quota exceeded while writing {key}")]
    QuotaExceeded { key: String },
    #[error("storage backend error: {0}")]
    Internal(String),
}

/// Minimal capability trait over a synchronous, single-key host store.
///
/// The host store offers no multi-key atomicity, no locking, and no schema
/// versioning; everything of that nature is emulated by the layers above.
/// Values are raw strings so the backend never needs to understand the
/// records it holds.
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value stored under `key`.
    ///
    /// # Errors
    /// Returns error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns error if the backend rejects the write (e.g. quota).
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Remove `key` if present.
    ///
    /// # Errors
    /// Returns error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), KvError>;
}

/// In-memory store implementation.
///
/// Reference backend for development and tests. An optional byte quota
/// emulates host storage limits so quota-exhaustion paths can be driven
/// deterministically.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    /// Create a new unbounded in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            quota_bytes: None,
        }
    }

    /// Create a store that rejects writes once total stored bytes would
    /// exceed `quota_bytes`.
    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Number of keys currently stored.
    ///
    /// # Panics
    /// Panics if the backing lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stored_bytes(map: &HashMap<String, String>) -> usize {
        map.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self
            .inner
            .read()
            .map_err(|e| KvError::Internal(e.to_string()))?
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut map = self
            .inner
            .write()
            .map_err(|e| KvError::Internal(e.to_string()))?;

        if let Some(quota) = self.quota_bytes {
            let current = Self::stored_bytes(&map);
            let replaced = map.get(key).map_or(0, |v| key.len() + v.len());
            let incoming = key.len() + value.len();
            if current - replaced + incoming > quota {
                return Err(KvError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }

        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        self.inner
            .write()
            .map_err(|e| KvError::Internal(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

/// Stand-in for an absent storage host.
///
/// Reads see an empty store and writes fail with [`KvError::Unavailable`],
/// so loaders above fall back to their defaults instead of erroring out.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl KeyValueStore for NullStore {
    fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), KvError> {
        Err(KvError::Unavailable)
    }

    fn remove(&self, _key: &str) -> Result<(), KvError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let store = MemoryStore::with_quota(10);
        store.set("a", "12345").unwrap();

        let err = store.set("b", "123456789").unwrap_err();
        assert!(matches!(err, KvError::QuotaExceeded { .. }));
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn test_quota_allows_replacing_existing_value() {
        let store = MemoryStore::with_quota(8);
        store.set("k", "1234567").unwrap();
        // Replacement frees the old value before charging the new one.
        store.set("k", "7654321").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("7654321"));
    }

    #[test]
    fn test_null_store_is_empty_and_rejects_writes() {
        let store = NullStore;
        assert_eq!(store.get("k").unwrap(), None);
        assert!(matches!(store.set("k", "v"), Err(KvError::Unavailable)));
        store.remove("k").unwrap();
    }
}
