//! Multi-session persistence for the agent console.
//!
//! Provides:
//! - `SessionStore` - CRUD over per-session records plus a summary index
//! - Sliding 24h expiry with lazy cleanup on read
//! - Capacity eviction (expired-first, else oldest by creation)
//! - An independent active-session pointer for crash recovery

pub mod store;
pub mod types;

pub use store::{SessionError, SessionStore};
pub use types::{
    ACTIVE_SESSION_KEY, CreateOptions, DEFAULT_MAX_SESSIONS, MAX_STATE_BYTES, SESSION_INDEX_KEY,
    SESSION_KEY_PREFIX, SESSION_TTL_MS, SessionData, SessionIndex, SessionMetadata, SessionMode,
    UpdateOptions, session_key,
};
