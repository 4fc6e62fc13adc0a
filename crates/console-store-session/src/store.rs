//! Session CRUD with sliding expiry, eviction, and recovery.

use console_store_core::{KeyValueStore, SafeStorage};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{
    ACTIVE_SESSION_KEY, CreateOptions, DEFAULT_MAX_SESSIONS, MAX_STATE_BYTES, SESSION_INDEX_KEY,
    SESSION_TTL_MS, SessionData, SessionIndex, SessionMetadata, UpdateOptions, session_key,
};

/// Session store failure.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session id: {0}")]
    InvalidId(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session expired: {0}")]
    Expired(String),
    #[error("session name is empty")]
    EmptyName,
    #[error("session state is {size} bytes, over the {limit} byte ceiling")]
    StateTooLarge { size: usize, limit: usize },
    #[error("storage rejected the session write")]
    Rejected,
}

/// Store for per-session records, their summary index, and the
/// active-session recovery pointer.
///
/// Each session lives under its own key; the index holds one
/// [`SessionMetadata`] summary per session and is written through on every
/// mutation so the two representations stay consistent. Expiry is lazy:
/// any read that observes a session past its expiry deletes it on the spot.
pub struct SessionStore<S> {
    storage: SafeStorage<S>,
    capacity: usize,
    ttl_ms: i64,
}

impl<S: KeyValueStore> SessionStore<S> {
    /// Create a store over `storage` with the default capacity and TTL.
    #[must_use]
    pub fn new(storage: SafeStorage<S>) -> Self {
        Self {
            storage,
            capacity: DEFAULT_MAX_SESSIONS,
            ttl_ms: SESSION_TTL_MS,
        }
    }

    /// Override the eviction capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Override the sliding TTL.
    #[must_use]
    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// Create a session and append its summary to the index.
    ///
    /// At capacity, exactly one session is evicted first: the first
    /// already-expired entry in index order, or failing that the entry with
    /// the oldest creation timestamp.
    ///
    /// # Errors
    /// Returns [`SessionError::EmptyName`], [`SessionError::StateTooLarge`],
    /// or [`SessionError::Rejected`] when the host storage refuses a write.
    pub fn create_session<T: Serialize>(
        &self,
        name: &str,
        state: &T,
        options: CreateOptions,
    ) -> Result<SessionMetadata, SessionError> {
        if name.trim().is_empty() {
            return Err(SessionError::EmptyName);
        }
        Self::check_state_size(state)?;

        let mut index = self.read_index();
        if index.sessions.len() >= self.capacity {
            self.evict_one(&mut index);
        }

        let now = self.storage.now_ms();
        let metadata = SessionMetadata {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            expires_at: now + self.ttl_ms,
            has_unsaved_changes: false,
            event_count: 0,
            mode: options.mode,
        };

        let record = SessionData {
            metadata: metadata.clone(),
            state,
        };
        if !self.storage.set_item(&session_key(&metadata.id), &record) {
            return Err(SessionError::Rejected);
        }

        index.sessions.push(metadata.clone());
        if !self.write_index(&mut index) {
            // Keep the record and index consistent on a half-landed create.
            self.storage.remove_item(&session_key(&metadata.id));
            return Err(SessionError::Rejected);
        }

        Ok(metadata)
    }

    /// Load the full record for `id`.
    ///
    /// A session observed past its expiry is deleted on the spot and
    /// reported as [`SessionError::Expired`] rather than returned stale.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidId`], [`SessionError::NotFound`], or
    /// [`SessionError::Expired`].
    pub fn load_session<T: DeserializeOwned>(
        &self,
        id: &str,
    ) -> Result<SessionData<T>, SessionError> {
        Self::validate_id(id)?;

        let record: SessionData<T> = self
            .storage
            .get_item(&session_key(id))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if record.metadata.is_expired(self.storage.now_ms()) {
            self.purge(id);
            return Err(SessionError::Expired(id.to_string()));
        }

        Ok(record)
    }

    /// Replace a session's state, renew its expiry, and write the updated
    /// summary through to the index in the same call.
    ///
    /// # Errors
    /// Same not-found/expired checks as [`load_session`](Self::load_session),
    /// plus [`SessionError::StateTooLarge`] and [`SessionError::Rejected`].
    pub fn update_session<T: Serialize>(
        &self,
        id: &str,
        state: &T,
        options: UpdateOptions,
    ) -> Result<SessionMetadata, SessionError> {
        Self::validate_id(id)?;
        Self::check_state_size(state)?;

        let existing: SessionData<Value> = self
            .storage
            .get_item(&session_key(id))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        let now = self.storage.now_ms();
        if existing.metadata.is_expired(now) {
            self.purge(id);
            return Err(SessionError::Expired(id.to_string()));
        }

        let mut metadata = existing.metadata;
        if let Some(name) = options.name {
            metadata.name = name;
        }
        if let Some(flag) = options.has_unsaved_changes {
            metadata.has_unsaved_changes = flag;
        }
        if let Some(count) = options.event_count {
            metadata.event_count = count;
        }
        if let Some(mode) = options.mode {
            metadata.mode = Some(mode);
        }
        metadata.updated_at = now;
        metadata.expires_at = now + self.ttl_ms;

        let record = SessionData {
            metadata: metadata.clone(),
            state,
        };
        if !self.storage.set_item(&session_key(id), &record) {
            return Err(SessionError::Rejected);
        }

        let mut index = self.read_index();
        match index.sessions.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => *entry = metadata.clone(),
            // The index lost this entry somewhere; put it back.
            None => index.sessions.push(metadata.clone()),
        }
        if !self.write_index(&mut index) {
            return Err(SessionError::Rejected);
        }

        Ok(metadata)
    }

    /// Delete a session, its index summary, and (when it was the active
    /// session) the recovery pointer. Deleting an absent session is a no-op.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidId`] for a malformed id.
    pub fn delete_session(&self, id: &str) -> Result<(), SessionError> {
        Self::validate_id(id)?;
        self.purge(id);
        Ok(())
    }

    /// Non-expired sessions, most recently updated first.
    ///
    /// Expired entries encountered along the way are deleted lazily, so a
    /// session that just failed `load_session` with `Expired` is already
    /// absent here.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionMetadata> {
        let index = self.read_index();
        let now = self.storage.now_ms();

        let (live, expired): (Vec<_>, Vec<_>) = index
            .sessions
            .iter()
            .cloned()
            .partition(|entry| !entry.is_expired(now));

        for entry in &expired {
            tracing::debug!(id = %entry.id, "lazily deleting expired session");
            self.purge(&entry.id);
        }

        let mut live = live;
        live.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        live
    }

    /// Mark `id` as the active session for crash recovery.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`]/[`SessionError::Expired`] when the
    /// session cannot be activated, or [`SessionError::Rejected`] when the
    /// pointer write fails.
    pub fn set_active_session(&self, id: &str) -> Result<(), SessionError> {
        // Reuse the full load checks so the pointer never targets a
        // missing or expired session.
        self.load_session::<Value>(id)?;

        if self.storage.set_item(ACTIVE_SESSION_KEY, &id) {
            Ok(())
        } else {
            Err(SessionError::Rejected)
        }
    }

    /// The session an interrupted run left active, if it is still
    /// recoverable.
    ///
    /// Validates that the pointed-to session exists and is unexpired,
    /// clearing the pointer (self-healing) when it is not.
    #[must_use]
    pub fn get_recoverable_session<T: DeserializeOwned>(&self) -> Option<SessionData<T>> {
        let id: String = self.storage.get_item(ACTIVE_SESSION_KEY)?;

        match self.load_session(&id) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(id = %id, "clearing stale active-session pointer: {e}");
                self.storage.remove_item(ACTIVE_SESSION_KEY);
                None
            }
        }
    }

    /// Drop the active-session pointer.
    pub fn clear_active_session(&self) {
        self.storage.remove_item(ACTIVE_SESSION_KEY);
    }

    fn validate_id(id: &str) -> Result<(), SessionError> {
        Uuid::parse_str(id)
            .map(|_| ())
            .map_err(|_| SessionError::InvalidId(id.to_string()))
    }

    fn check_state_size<T: Serialize>(state: &T) -> Result<(), SessionError> {
        let size = serde_json::to_string(state).map(|raw| raw.len()).unwrap_or(0);
        if size > MAX_STATE_BYTES {
            return Err(SessionError::StateTooLarge {
                size,
                limit: MAX_STATE_BYTES,
            });
        }
        Ok(())
    }

    fn read_index(&self) -> SessionIndex {
        self.storage
            .get_item(SESSION_INDEX_KEY)
            .unwrap_or_default()
    }

    fn write_index(&self, index: &mut SessionIndex) -> bool {
        index.version += 1;
        self.storage.set_item(SESSION_INDEX_KEY, index)
    }

    /// Remove a session's record and index entry, healing the active
    /// pointer when it referenced the removed id.
    fn purge(&self, id: &str) {
        self.storage.remove_item(&session_key(id));

        let mut index = self.read_index();
        let before = index.sessions.len();
        index.sessions.retain(|entry| entry.id != id);
        if index.sessions.len() != before {
            self.write_index(&mut index);
        }

        if self.storage.get_item::<String>(ACTIVE_SESSION_KEY).as_deref() == Some(id) {
            self.storage.remove_item(ACTIVE_SESSION_KEY);
        }
    }

    /// Evict exactly one session to make room: the first already-expired
    /// entry in index order, else the oldest by creation timestamp.
    fn evict_one(&self, index: &mut SessionIndex) {
        let now = self.storage.now_ms();

        let position = index
            .sessions
            .iter()
            .position(|entry| entry.is_expired(now))
            .or_else(|| {
                index
                    .sessions
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, entry)| entry.created_at)
                    .map(|(position, _)| position)
            });

        if let Some(position) = position {
            let victim = index.sessions.remove(position);
            tracing::debug!(id = %victim.id, "evicting session at capacity");
            self.storage.remove_item(&session_key(&victim.id));
            if self
                .storage
                .get_item::<String>(ACTIVE_SESSION_KEY)
                .as_deref()
                == Some(victim.id.as_str())
            {
                self.storage.remove_item(ACTIVE_SESSION_KEY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use console_store_core::{Clock, ManualClock, MemoryStore};
    use serde_json::json;

    use super::*;
    use crate::types::SessionMode;

    fn fixture() -> (SessionStore<MemoryStore>, Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = MemoryStore::new();
        let storage = SafeStorage::new(backend.clone()).with_clock(clock.clone());
        (SessionStore::new(storage), clock, backend)
    }

    #[test]
    fn test_create_and_load_roundtrip() {
        let (store, _, _) = fixture();

        let meta = store
            .create_session(
                "first run",
                &json!({"events": [1, 2, 3]}),
                CreateOptions {
                    mode: Some(SessionMode::Live),
                },
            )
            .unwrap();
        assert_eq!(meta.event_count, 0);
        assert!(!meta.has_unsaved_changes);
        assert_eq!(meta.expires_at, meta.created_at + SESSION_TTL_MS);

        let record = store.load_session::<Value>(&meta.id).unwrap();
        assert_eq!(record.metadata, meta);
        assert_eq!(record.state, json!({"events": [1, 2, 3]}));
    }

    #[test]
    fn test_create_rejects_empty_name_and_oversized_state() {
        let (store, _, _) = fixture();

        assert!(matches!(
            store.create_session("  ", &json!(1), CreateOptions::default()),
            Err(SessionError::EmptyName)
        ));

        let huge = "x".repeat(MAX_STATE_BYTES + 1);
        assert!(matches!(
            store.create_session("big", &huge, CreateOptions::default()),
            Err(SessionError::StateTooLarge { .. })
        ));
    }

    #[test]
    fn test_load_rejects_malformed_and_unknown_ids() {
        let (store, _, _) = fixture();

        assert!(matches!(
            store.load_session::<Value>("not-a-uuid"),
            Err(SessionError::InvalidId(_))
        ));

        let ghost = Uuid::new_v4().to_string();
        assert!(matches!(
            store.load_session::<Value>(&ghost),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_orders_by_most_recent_update() {
        let (store, clock, _) = fixture();

        let a = store
            .create_session("A", &json!({"x": 1}), CreateOptions::default())
            .unwrap();
        clock.advance(10);
        let b = store
            .create_session("B", &json!({"y": 2}), CreateOptions::default())
            .unwrap();

        let names: Vec<String> = store.list_sessions().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["B", "A"]);

        clock.advance(10);
        store
            .update_session(&a.id, &json!({"x": 2}), UpdateOptions::default())
            .unwrap();

        let ids: Vec<String> = store.list_sessions().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_expired_session_fails_load_and_vanishes() {
        let (store, clock, backend) = fixture();

        let meta = store
            .create_session("A", &json!(1), CreateOptions::default())
            .unwrap();
        clock.advance(SESSION_TTL_MS);

        assert!(matches!(
            store.load_session::<Value>(&meta.id),
            Err(SessionError::Expired(_))
        ));
        // Lazy cleanup removed the record and the index entry.
        assert_eq!(backend.get(&session_key(&meta.id)).unwrap(), None);
        assert!(store.list_sessions().is_empty());
    }

    #[test]
    fn test_expired_session_fails_update() {
        let (store, clock, _) = fixture();

        let meta = store
            .create_session("A", &json!(1), CreateOptions::default())
            .unwrap();
        clock.advance(SESSION_TTL_MS + 1);

        assert!(matches!(
            store.update_session(&meta.id, &json!(2), UpdateOptions::default()),
            Err(SessionError::Expired(_))
        ));
        assert!(store.list_sessions().is_empty());
    }

    #[test]
    fn test_update_renews_sliding_expiry() {
        let (store, clock, _) = fixture();

        let meta = store
            .create_session("A", &json!(1), CreateOptions::default())
            .unwrap();

        clock.advance(SESSION_TTL_MS - 1);
        let renewed = store
            .update_session(&meta.id, &json!(2), UpdateOptions::default())
            .unwrap();
        assert_eq!(renewed.expires_at, clock.now_ms() + SESSION_TTL_MS);

        // Well past the original expiry, but within the renewed window.
        clock.advance(SESSION_TTL_MS - 1);
        let record = store.load_session::<Value>(&meta.id).unwrap();
        assert_eq!(record.state, json!(2));
    }

    #[test]
    fn test_update_applies_options_and_writes_index_through() {
        let (store, clock, _) = fixture();

        let meta = store
            .create_session("A", &json!(1), CreateOptions::default())
            .unwrap();
        clock.advance(5);

        let updated = store
            .update_session(
                &meta.id,
                &json!(2),
                UpdateOptions {
                    name: Some("renamed".to_string()),
                    has_unsaved_changes: Some(true),
                    event_count: Some(17),
                    mode: Some(SessionMode::Replay),
                },
            )
            .unwrap();

        assert_eq!(updated.name, "renamed");
        assert!(updated.has_unsaved_changes);
        assert_eq!(updated.event_count, 17);
        assert_eq!(updated.mode, Some(SessionMode::Replay));

        // The index summary matches the record in the same call.
        let listed = store.list_sessions();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], updated);
    }

    #[test]
    fn test_capacity_evicts_oldest_when_none_expired() {
        let (store, clock, _) = fixture();
        let store = store.with_capacity(2);

        let a = store
            .create_session("A", &json!(1), CreateOptions::default())
            .unwrap();
        clock.advance(10);
        let b = store
            .create_session("B", &json!(2), CreateOptions::default())
            .unwrap();
        clock.advance(10);
        let c = store
            .create_session("C", &json!(3), CreateOptions::default())
            .unwrap();

        assert!(matches!(
            store.load_session::<Value>(&a.id),
            Err(SessionError::NotFound(_))
        ));
        assert!(store.load_session::<Value>(&b.id).is_ok());
        assert!(store.load_session::<Value>(&c.id).is_ok());
        assert_eq!(store.list_sessions().len(), 2);
    }

    #[test]
    fn test_capacity_prefers_evicting_expired_over_oldest() {
        let (store, clock, _) = fixture();
        let store = store.with_capacity(2);

        let a = store
            .create_session("A", &json!(1), CreateOptions::default())
            .unwrap();
        clock.advance(10);
        let b = store
            .create_session("B", &json!(2), CreateOptions::default())
            .unwrap();

        // Renew A so that B (not the oldest) is the one that expires.
        clock.advance(SESSION_TTL_MS - 20);
        store
            .update_session(&a.id, &json!(1), UpdateOptions::default())
            .unwrap();
        clock.advance(25);

        let c = store
            .create_session("C", &json!(3), CreateOptions::default())
            .unwrap();

        // B was expired and got evicted; A, the oldest, survived.
        assert!(store.load_session::<Value>(&a.id).is_ok());
        assert!(matches!(
            store.load_session::<Value>(&b.id),
            Err(SessionError::NotFound(_))
        ));
        assert!(store.load_session::<Value>(&c.id).is_ok());
    }

    #[test]
    fn test_delete_active_session_clears_pointer() {
        let (store, _, backend) = fixture();

        let active = store
            .create_session("active", &json!(1), CreateOptions::default())
            .unwrap();
        let other = store
            .create_session("other", &json!(2), CreateOptions::default())
            .unwrap();
        store.set_active_session(&active.id).unwrap();

        // Deleting a non-active session leaves the pointer untouched.
        store.delete_session(&other.id).unwrap();
        assert!(backend.get(ACTIVE_SESSION_KEY).unwrap().is_some());

        store.delete_session(&active.id).unwrap();
        assert_eq!(backend.get(ACTIVE_SESSION_KEY).unwrap(), None);
    }

    #[test]
    fn test_recoverable_session_roundtrip() {
        let (store, _, _) = fixture();

        assert!(store.get_recoverable_session::<Value>().is_none());

        let meta = store
            .create_session("A", &json!({"step": 4}), CreateOptions::default())
            .unwrap();
        store.set_active_session(&meta.id).unwrap();

        let recovered = store.get_recoverable_session::<Value>().unwrap();
        assert_eq!(recovered.metadata.id, meta.id);
        assert_eq!(recovered.state, json!({"step": 4}));
    }

    #[test]
    fn test_recoverable_pointer_self_heals() {
        let (store, clock, backend) = fixture();

        let meta = store
            .create_session("A", &json!(1), CreateOptions::default())
            .unwrap();
        store.set_active_session(&meta.id).unwrap();

        // Pointer outlives the session: expiry invalidates it.
        clock.advance(SESSION_TTL_MS);
        assert!(store.get_recoverable_session::<Value>().is_none());
        assert_eq!(backend.get(ACTIVE_SESSION_KEY).unwrap(), None);

        // A pointer at a session that never existed heals too.
        let storage = SafeStorage::new(backend.clone());
        assert!(storage.set_item(ACTIVE_SESSION_KEY, &Uuid::new_v4().to_string()));
        assert!(store.get_recoverable_session::<Value>().is_none());
        assert_eq!(backend.get(ACTIVE_SESSION_KEY).unwrap(), None);
    }

    #[test]
    fn test_set_active_rejects_unknown_session() {
        let (store, _, _) = fixture();
        let ghost = Uuid::new_v4().to_string();

        assert!(matches!(
            store.set_active_session(&ghost),
            Err(SessionError::NotFound(_))
        ));
    }
}
