//! Fail-safe typed wrapper over the key-value capability.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    clock::{Clock, SystemClock},
    kv::KeyValueStore,
};

/// Largest raw value the wrapper will read or write, in bytes.
///
/// Oversized values are rejected before any parse attempt so a corrupt or
/// runaway record cannot stall the caller.
pub const MAX_VALUE_BYTES: usize = 2 * 1024 * 1024;

/// Fail-safe storage wrapper.
///
/// The one layer that touches raw backend and parse errors: every failure
/// is caught here, logged, and degraded to a `None` or `false`. No panic or
/// error from this type ever reaches a caller, which is the foundation the
/// versioned, batch, config, and session layers all rely on.
#[derive(Clone)]
pub struct SafeStorage<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: KeyValueStore> SafeStorage<S> {
    /// Wrap a backend with the system clock.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock (used by expiry and ordering tests).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current time in milliseconds, from the configured clock.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Read and parse the value under `key`.
    ///
    /// Returns `None` when the key is absent, the raw value exceeds
    /// [`MAX_VALUE_BYTES`], or the value does not parse as `T`. The two
    /// failure cases are logged.
    #[must_use]
    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;

        if raw.len() > MAX_VALUE_BYTES {
            tracing::warn!(
                key,
                size = raw.len(),
                limit = MAX_VALUE_BYTES,
                "stored value exceeds size ceiling, ignoring"
            );
            return None;
        }

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, "failed to parse stored value: {e}");
                None
            }
        }
    }

    /// Serialize and store `value` under `key`.
    ///
    /// Returns `false` (after logging) when serialization fails, the
    /// serialized form exceeds [`MAX_VALUE_BYTES`], or the backend rejects
    /// the write (e.g. quota exhaustion).
    pub fn set_item<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, "failed to serialize value: {e}");
                return false;
            }
        };
        self.set_raw(key, &raw)
    }

    /// Remove `key`. Best-effort; a backend failure is logged and swallowed.
    pub fn remove_item(&self, key: &str) -> bool {
        match self.store.remove(key) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, "failed to remove key: {e}");
                false
            }
        }
    }

    /// Read the exact raw string stored under `key`.
    ///
    /// No size ceiling applies: this is the snapshot/restore path of the
    /// batch engine, which must observe stored bytes verbatim.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, "failed to read key: {e}");
                None
            }
        }
    }

    /// Store a raw string under `key`, enforcing the size ceiling.
    pub fn set_raw(&self, key: &str, raw: &str) -> bool {
        if raw.len() > MAX_VALUE_BYTES {
            tracing::warn!(
                key,
                size = raw.len(),
                limit = MAX_VALUE_BYTES,
                "refusing to store oversized value"
            );
            return false;
        }

        match self.store.set(key, raw) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, "failed to write key: {e}");
                false
            }
        }
    }
}
