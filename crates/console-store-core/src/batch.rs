//! Multi-key grouped writes with snapshot-based rollback.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{kv::KeyValueStore, safe::SafeStorage};

/// A single mutation within a batch.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    /// Store `value` under `key`.
    Set { key: String, value: Value },
    /// Remove `key`.
    Remove { key: String },
}

impl BatchOperation {
    /// Key this operation touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// Outcome of a fully applied batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Operations applied.
    pub completed: usize,
    /// Operations in the batch.
    pub total: usize,
}

/// Batch failure.
#[derive(Debug, Error)]
pub enum BatchError {
    /// An operation failed partway; every captured key was restored to its
    /// pre-batch value (`rolled_back` reports whether all restores landed).
    #[error("batch aborted on {failed_key} after {completed}/{total} operations")]
    Aborted {
        failed_key: String,
        completed: usize,
        total: usize,
        rolled_back: bool,
    },
}

/// Transaction state failure.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction is already committed")]
    AlreadyCommitted,
    #[error("rollback requires a prior commit attempt")]
    NoSnapshot,
    #[error("failed to serialize value for {key}: {message}")]
    Serialize { key: String, message: String },
    #[error("rollback could not restore all keys")]
    RestoreFailed,
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Pre-batch raw values (or absence) for every unique key a batch touches.
type Snapshot = HashMap<String, Option<String>>;

impl<S: KeyValueStore> SafeStorage<S> {
    /// Apply `operations` strictly in order, rolling back on failure.
    ///
    /// Before any mutation, the current raw value (or absence) of every
    /// unique key in the batch is captured. If an operation fails, every
    /// captured key is restored to that pre-batch state. This gives
    /// all-or-nothing behavior for self-inflicted failures only: a
    /// concurrent writer touching the same keys mid-batch is invisible
    /// here, and a rollback restores *this batch's* view of "before".
    ///
    /// # Errors
    /// Returns [`BatchError::Aborted`] when an operation fails.
    pub fn batch_write(&self, operations: &[BatchOperation]) -> Result<BatchReport, BatchError> {
        let snapshot = self.capture_snapshot(operations);

        for (index, op) in operations.iter().enumerate() {
            let applied = match op {
                BatchOperation::Set { key, value } => match serde_json::to_string(value) {
                    Ok(raw) => self.set_raw(key, &raw),
                    Err(e) => {
                        tracing::warn!(key, "failed to serialize batch value: {e}");
                        false
                    }
                },
                BatchOperation::Remove { key } => self.remove_item(key),
            };

            if !applied {
                let rolled_back = self.restore_snapshot(&snapshot);
                return Err(BatchError::Aborted {
                    failed_key: op.key().to_string(),
                    completed: index,
                    total: operations.len(),
                    rolled_back,
                });
            }
        }

        Ok(BatchReport {
            completed: operations.len(),
            total: operations.len(),
        })
    }

    /// Begin a transaction against this storage.
    #[must_use]
    pub fn transaction(&self) -> StorageTransaction<'_, S> {
        StorageTransaction {
            storage: self,
            operations: Vec::new(),
            committed: false,
            snapshot: None,
        }
    }

    fn capture_snapshot(&self, operations: &[BatchOperation]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for op in operations {
            snapshot
                .entry(op.key().to_string())
                .or_insert_with(|| self.get_raw(op.key()));
        }
        snapshot
    }

    fn restore_snapshot(&self, snapshot: &Snapshot) -> bool {
        let mut complete = true;
        for (key, previous) in snapshot {
            let restored = match previous {
                Some(raw) => self.set_raw(key, raw),
                None => self.remove_item(key),
            };
            if !restored {
                tracing::warn!(key, "rollback failed to restore key");
                complete = false;
            }
        }
        complete
    }
}

/// Chainable multi-key transaction.
///
/// Queues `set`/`remove` operations, then applies them through
/// [`SafeStorage::batch_write`] on [`commit`](Self::commit). The commit
/// attempt captures a snapshot of every touched key, so a later
/// [`rollback`](Self::rollback) can restore the pre-commit state even after
/// a successful commit.
pub struct StorageTransaction<'a, S> {
    storage: &'a SafeStorage<S>,
    operations: Vec<BatchOperation>,
    committed: bool,
    snapshot: Option<Snapshot>,
}

impl<S: KeyValueStore> StorageTransaction<'_, S> {
    /// Queue a set of `key` to `value`.
    ///
    /// # Errors
    /// Returns [`TransactionError::AlreadyCommitted`] after a successful
    /// commit, or a serialization error for unrepresentable values.
    pub fn set<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<&mut Self, TransactionError> {
        self.ensure_open()?;
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| TransactionError::Serialize {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.operations.push(BatchOperation::Set { key, value });
        Ok(self)
    }

    /// Queue a removal of `key`.
    ///
    /// # Errors
    /// Returns [`TransactionError::AlreadyCommitted`] after a successful commit.
    pub fn remove(&mut self, key: impl Into<String>) -> Result<&mut Self, TransactionError> {
        self.ensure_open()?;
        self.operations.push(BatchOperation::Remove { key: key.into() });
        Ok(self)
    }

    /// Apply all queued operations.
    ///
    /// Snapshots the pre-state of every touched key, delegates to the batch
    /// engine, and marks the transaction committed only when every
    /// operation landed.
    ///
    /// # Errors
    /// Returns [`TransactionError::AlreadyCommitted`] on a second commit, or
    /// the underlying [`BatchError`] when an operation failed (the batch
    /// engine has already rolled the keys back in that case).
    pub fn commit(&mut self) -> Result<BatchReport, TransactionError> {
        self.ensure_open()?;
        self.snapshot = Some(self.storage.capture_snapshot(&self.operations));

        let report = self.storage.batch_write(&self.operations)?;
        self.committed = true;
        Ok(report)
    }

    /// Restore every key touched by the last commit attempt and clear the
    /// committed flag.
    ///
    /// # Errors
    /// Returns [`TransactionError::NoSnapshot`] when no commit was attempted,
    /// or [`TransactionError::RestoreFailed`] when a key could not be
    /// restored.
    pub fn rollback(&mut self) -> Result<(), TransactionError> {
        let snapshot = self.snapshot.take().ok_or(TransactionError::NoSnapshot)?;

        let complete = self.storage.restore_snapshot(&snapshot);
        self.committed = false;

        if complete {
            Ok(())
        } else {
            Err(TransactionError::RestoreFailed)
        }
    }

    /// Whether the transaction has been committed.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.committed
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether no operations are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    const fn ensure_open(&self) -> Result<(), TransactionError> {
        if self.committed {
            Err(TransactionError::AlreadyCommitted)
        } else {
            Ok(())
        }
    }
}
