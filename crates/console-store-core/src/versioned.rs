//! Optimistic locking primitives over the safe storage wrapper.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use crate::{kv::KeyValueStore, safe::SafeStorage};

/// A record under optimistic version control.
///
/// `version` increases by exactly 1 per successful write; version 0 means
/// "does not exist yet".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecord<T> {
    pub data: T,
    pub version: u64,
    pub updated_at: i64,
}

/// Failure of an optimistic write.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Another writer landed first; the caller may retry.
    #[error("version conflict on {key}: expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },
    /// Compare-and-swap observed a different value than expected.
    #[error("stored value for {key} did not match the expected value")]
    ValueMismatch { key: String },
    /// Value could not be serialized.
    #[error("failed to serialize value for {key}: {message}")]
    Serialize { key: String, message: String },
    /// The backend rejected the write; details were already logged.
    #[error("write to {key} was rejected by the backing store")]
    Rejected { key: String },
}

impl WriteError {
    /// Whether this error is a lost optimistic race, worth retrying.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::ValueMismatch { .. })
    }
}

impl<S: KeyValueStore> SafeStorage<S> {
    /// Read the versioned record under `key`, if any.
    #[must_use]
    pub fn read_versioned<T: DeserializeOwned>(&self, key: &str) -> Option<VersionedRecord<T>> {
        self.get_item(key)
    }

    /// Write `data` under `key` if the stored version equals `expected_version`.
    ///
    /// The current version is 0 when no record exists. On a match the record
    /// is replaced with `{data, version: expected + 1, updatedAt: now}` and
    /// the new version is returned; on a mismatch storage is left untouched.
    ///
    /// Read-then-write is two separate host calls, so a racing writer can
    /// still land in between; what this guarantees is *detection* of the
    /// lost race on the next operation, not mutual exclusion.
    ///
    /// # Errors
    /// Returns [`WriteError::Conflict`] on a version mismatch, or
    /// [`WriteError::Rejected`] if the backend refused the write.
    pub fn write_versioned<T: Serialize>(
        &self,
        key: &str,
        data: T,
        expected_version: u64,
    ) -> Result<u64, WriteError> {
        let found = self
            .read_versioned::<Value>(key)
            .map_or(0, |record| record.version);

        if found != expected_version {
            return Err(WriteError::Conflict {
                key: key.to_string(),
                expected: expected_version,
                found,
            });
        }

        let record = VersionedRecord {
            data,
            version: expected_version + 1,
            updated_at: self.now_ms(),
        };

        if self.set_item(key, &record) {
            Ok(record.version)
        } else {
            Err(WriteError::Rejected {
                key: key.to_string(),
            })
        }
    }

    /// Replace the value under `key` only if it currently equals `expected`.
    ///
    /// A lighter-weight sibling of [`write_versioned`](Self::write_versioned)
    /// with no version envelope: the comparison is structural (both sides
    /// viewed as JSON values, so object key order is irrelevant) and the
    /// replacement is the plain serialized form of `new`. `None` means
    /// "expect the key to be absent". A stored value that does not parse
    /// matches nothing.
    ///
    /// # Errors
    /// Returns [`WriteError::ValueMismatch`] when the stored value differs
    /// from `expected`, or [`WriteError::Rejected`] if the backend refused
    /// the write.
    pub fn compare_and_swap<T: Serialize>(
        &self,
        key: &str,
        expected: Option<&T>,
        new: &T,
    ) -> Result<(), WriteError> {
        let current: Option<Value> = match self.get_raw(key) {
            None => None,
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(_) => {
                    return Err(WriteError::ValueMismatch {
                        key: key.to_string(),
                    });
                }
            },
        };

        let expected: Option<Value> = expected
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| WriteError::Serialize {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        if current != expected {
            return Err(WriteError::ValueMismatch {
                key: key.to_string(),
            });
        }

        if self.set_item(key, new) {
            Ok(())
        } else {
            Err(WriteError::Rejected {
                key: key.to_string(),
            })
        }
    }
}
