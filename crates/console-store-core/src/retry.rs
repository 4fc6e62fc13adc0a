//! Conflict retry loop and read-modify-write utility.

use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

use crate::{kv::KeyValueStore, safe::SafeStorage, versioned::WriteError};

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(50);

/// Errors whose conflict case is worth retrying.
///
/// Only optimistic-lock and compare-and-swap mismatches qualify; every
/// other failure is terminal for the call.
pub trait Retryable {
    /// Whether this error is a lost optimistic race.
    fn is_conflict(&self) -> bool;
}

impl Retryable for WriteError {
    fn is_conflict(&self) -> bool {
        Self::is_conflict(self)
    }
}

/// Invoke `operation`, retrying conflicts with exponential backoff.
///
/// Returns immediately on success or on any non-conflict failure. On a
/// conflict the loop waits `base_delay * 2^attempt` and tries again, up to
/// `max_retries` times, then returns the last result. The backoff sleep is
/// the only suspension point in this crate and is not cancellable; the loop
/// always runs to success or retry exhaustion.
///
/// # Errors
/// Returns the operation's error once retries are exhausted or a
/// non-conflict failure occurs.
pub async fn retry_with_backoff<T, E, F>(
    mut operation: F,
    max_retries: u32,
    base_delay: Duration,
) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Err(e) if e.is_conflict() && attempt < max_retries => {
                let delay = base_delay * 2_u32.saturating_pow(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "conflict, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

impl<S: KeyValueStore> SafeStorage<S> {
    /// Apply `modifier` to the freshest value under `key` and persist it.
    ///
    /// Each attempt re-reads the record (capturing its current version),
    /// applies `modifier` to the current data (`None` when the record does
    /// not exist), and writes with that freshly captured version. A retry
    /// therefore re-applies the modifier to the latest data instead of
    /// replaying a stale diff, so the net effect under contention is always
    /// "modifier applied to whatever is truly latest at commit time".
    /// `modifier` may be invoked more than once and must be safe to re-run.
    ///
    /// # Errors
    /// Returns the final [`WriteError`] once retries are exhausted or a
    /// non-conflict failure occurs.
    pub async fn read_modify_write<T, F>(
        &self,
        key: &str,
        mut modifier: F,
        max_retries: u32,
    ) -> Result<u64, WriteError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(Option<T>) -> T,
    {
        retry_with_backoff(
            || {
                let (current, version) = self
                    .read_versioned::<T>(key)
                    .map_or((None, 0), |record| (Some(record.data), record.version));

                self.write_versioned(key, modifier(current), version)
            },
            max_retries,
            DEFAULT_BASE_DELAY,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::kv::MemoryStore;

    #[tokio::test]
    async fn test_retry_returns_success_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, WriteError> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            },
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_terminal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, WriteError> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(WriteError::Rejected { key: "k".into() })
            },
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(1),
        )
        .await;

        assert!(matches!(result, Err(WriteError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_on_persistent_conflict() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, WriteError> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(WriteError::Conflict {
                    key: "k".into(),
                    expected: 0,
                    found: 1,
                })
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert!(matches!(result, Err(WriteError::Conflict { .. })));
        // Initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_conflict() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, WriteError> = retry_with_backoff(
            || {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WriteError::Conflict {
                        key: "k".into(),
                        expected: 0,
                        found: 1,
                    })
                } else {
                    Ok(42)
                }
            },
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_read_modify_write_creates_and_increments() {
        let storage = SafeStorage::new(MemoryStore::new());

        let version = storage
            .read_modify_write::<u32, _>("counter", |n| n.unwrap_or(0) + 1, DEFAULT_MAX_RETRIES)
            .await
            .unwrap();
        assert_eq!(version, 1);

        let version = storage
            .read_modify_write::<u32, _>("counter", |n| n.unwrap_or(0) + 1, DEFAULT_MAX_RETRIES)
            .await
            .unwrap();
        assert_eq!(version, 2);

        let record = storage.read_versioned::<u32>("counter").unwrap();
        assert_eq!(record.data, 2);
    }

    #[tokio::test]
    async fn test_read_modify_write_sees_latest_data_under_contention() {
        let store = MemoryStore::new();
        let storage = SafeStorage::new(store.clone());
        let rival = SafeStorage::new(store);

        storage.write_versioned("k", 10_u32, 0).unwrap();

        // The rival lands a write between our read and our write on the
        // first attempt only; the retry must re-read and see 100.
        let interfered = AtomicU32::new(0);
        let version = storage
            .read_modify_write::<u32, _>(
                "k",
                |current| {
                    let base = current.unwrap_or(0);
                    if interfered.fetch_add(1, Ordering::SeqCst) == 0 {
                        rival.write_versioned("k", 100_u32, 1).unwrap();
                    }
                    base + 1
                },
                DEFAULT_MAX_RETRIES,
            )
            .await
            .unwrap();

        assert_eq!(version, 3);
        let record = storage.read_versioned::<u32>("k").unwrap();
        // Modifier applied to the rival's 100, not our stale 10.
        assert_eq!(record.data, 101);
    }
}
