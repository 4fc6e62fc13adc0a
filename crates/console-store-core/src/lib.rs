//! Storage foundation for the agent console.
//!
//! This crate provides the fundamental building blocks:
//! - `KeyValueStore` - Minimal capability trait over the host key-value store
//! - `SafeStorage` - Fail-safe typed wrapper; every failure degrades to a logged no-op
//! - Versioned records - Optimistic locking and compare-and-swap primitives
//! - Batch engine - Multi-key grouped writes with snapshot-based rollback
//! - Retry utility - Exponential backoff and read-modify-write loops

pub mod batch;
pub mod clock;
pub mod kv;
pub mod retry;
pub mod safe;
pub mod versioned;

pub use batch::{BatchError, BatchOperation, BatchReport, StorageTransaction, TransactionError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use kv::{KeyValueStore, KvError, MemoryStore, NullStore};
pub use retry::{Retryable, retry_with_backoff};
pub use safe::SafeStorage;
pub use versioned::{VersionedRecord, WriteError};
