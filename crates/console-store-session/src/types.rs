//! Persisted session shapes and store constants.

use serde::{Deserialize, Serialize};

/// Fixed key the session summary index lives under.
pub const SESSION_INDEX_KEY: &str = "console.sessions.index";

/// Fixed key the active-session recovery pointer lives under.
pub const ACTIVE_SESSION_KEY: &str = "console.sessions.active";

/// Prefix of the per-session record keys.
pub const SESSION_KEY_PREFIX: &str = "console.session.";

/// Sliding time-to-live granted on creation and every successful update.
pub const SESSION_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Default capacity before eviction kicks in.
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Hard ceiling on a session's serialized state.
pub const MAX_STATE_BYTES: usize = 1024 * 1024;

/// Key of the full record for session `id`.
#[must_use]
pub fn session_key(id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{id}")
}

/// How the console is driving a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Driving a live remote agent.
    Live,
    /// Replaying a recorded timeline.
    Replay,
}

/// Summary entry kept in both the index and the full record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
    pub has_unsaved_changes: bool,
    pub event_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SessionMode>,
}

impl SessionMetadata {
    /// Whether this session is past its expiry at `now_ms`.
    #[must_use]
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

/// One full session record, keyed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData<T> {
    pub metadata: SessionMetadata,
    pub state: T,
}

/// Summary list kept consistent with the individual records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndex {
    pub sessions: Vec<SessionMetadata>,
    pub version: u64,
}

/// Options for [`SessionStore::create_session`](crate::SessionStore::create_session).
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub mode: Option<SessionMode>,
}

/// Options for [`SessionStore::update_session`](crate::SessionStore::update_session).
/// `None` fields leave the stored metadata untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub name: Option<String>,
    pub has_unsaved_changes: Option<bool>,
    pub event_count: Option<u64>,
    pub mode: Option<SessionMode>,
}
