//! Load, migrate, save, and partially update the configuration record.

use console_store_core::{
    KeyValueStore, Retryable, SafeStorage, WriteError,
    retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES},
    retry_with_backoff,
};
use serde_json::Value;
use thiserror::Error;

use crate::{
    migrate::{CURRENT_SCHEMA_VERSION, run_migrations},
    schema::{AppConfig, MAX_CONFIG_BYTES, MAX_REMOTE_AGENTS, RemoteAgentConfig},
    version::compare_versions,
};

/// Fixed key the config record lives under.
pub const CONFIG_KEY: &str = "console.config";

/// Configuration store failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config blob is {size} bytes, over the {limit} byte ceiling")]
    TooLarge { size: usize, limit: usize },
    #[error("stored config could not be parsed: {0}")]
    Malformed(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("migration to {version} failed: {message}")]
    Migration { version: String, message: String },
    #[error("stored schema version {found} is newer than this build supports")]
    UnsupportedVersion { found: String },
    #[error(transparent)]
    Swap(#[from] WriteError),
}

impl Retryable for ConfigError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Swap(e) if e.is_conflict())
    }
}

/// Where a loaded config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed (and possibly migrated) from the stored record.
    Stored,
    /// Built-in defaults; `error` explains why when a record existed.
    Defaults,
}

/// Result of a load. Loading never fails outright: when the stored record
/// is unusable the defaults are returned alongside the error describing why.
#[derive(Debug)]
pub struct ConfigLoaded {
    pub config: AppConfig,
    pub migrated: bool,
    pub source: ConfigSource,
    pub error: Option<ConfigError>,
}

/// Store for the single schema-versioned [`AppConfig`] record.
pub struct ConfigStore<S> {
    storage: SafeStorage<S>,
}

impl<S: KeyValueStore> ConfigStore<S> {
    /// Create a store over `storage`.
    #[must_use]
    pub fn new(storage: SafeStorage<S>) -> Self {
        Self { storage }
    }

    /// Load the config, migrating an older record forward.
    ///
    /// Every failure path (absent host, oversized blob, unparseable JSON,
    /// failed migration, structural or semantic validation) degrades to the
    /// built-in defaults with the error attached. When migration changed the
    /// record, the migrated form is written back (best-effort).
    #[must_use]
    pub fn load(&self) -> ConfigLoaded {
        let Some(raw) = self.storage.get_raw(CONFIG_KEY) else {
            return ConfigLoaded {
                config: AppConfig::default(),
                migrated: false,
                source: ConfigSource::Defaults,
                error: None,
            };
        };

        if raw.len() > MAX_CONFIG_BYTES {
            return Self::defaults_with(ConfigError::TooLarge {
                size: raw.len(),
                limit: MAX_CONFIG_BYTES,
            });
        }

        let mut root = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Self::defaults_with(ConfigError::Malformed(
                    "config record is not an object".to_string(),
                ));
            }
            Err(e) => return Self::defaults_with(ConfigError::Malformed(e.to_string())),
        };

        let stored_version = root
            .get("schemaVersion")
            .and_then(Value::as_str)
            .unwrap_or("0.0.0")
            .to_string();

        if compare_versions(&stored_version, CURRENT_SCHEMA_VERSION) == std::cmp::Ordering::Greater
        {
            return Self::defaults_with(ConfigError::UnsupportedVersion {
                found: stored_version,
            });
        }

        let migrated = match run_migrations(&mut root, &stored_version, CURRENT_SCHEMA_VERSION) {
            Ok(migrated) => migrated,
            Err(e) => return Self::defaults_with(e),
        };

        let config = match serde_json::from_value::<AppConfig>(Value::Object(root)) {
            Ok(config) => config,
            Err(e) => return Self::defaults_with(ConfigError::Malformed(e.to_string())),
        };

        if let Err(e) = config.validate() {
            return Self::defaults_with(e);
        }

        if migrated && !self.storage.set_item(CONFIG_KEY, &config) {
            tracing::warn!("could not write back migrated config");
        }

        ConfigLoaded {
            config,
            migrated,
            source: ConfigSource::Stored,
            error: None,
        }
    }

    /// Validate, stamp, and persist `config`.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] or [`ConfigError::TooLarge`] when the
    /// config fails its checks, or a rejected-write error when the host
    /// storage refuses it.
    pub fn save(&self, config: AppConfig) -> Result<AppConfig, ConfigError> {
        config.validate()?;
        let (config, raw) = self.stamp(config)?;

        if self.storage.set_raw(CONFIG_KEY, &raw) {
            Ok(config)
        } else {
            Err(ConfigError::Swap(WriteError::Rejected {
                key: CONFIG_KEY.to_string(),
            }))
        }
    }

    /// Add a remote agent, or replace the entry with the same id in place.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when the agent entry is incomplete
    /// or the roster is already at [`MAX_REMOTE_AGENTS`].
    pub async fn upsert_remote_agent(
        &self,
        agent: RemoteAgentConfig,
    ) -> Result<AppConfig, ConfigError> {
        agent.validate()?;

        self.merge_with_retry(&|config: &mut AppConfig| {
            if let Some(slot) = config
                .remote_agents
                .iter_mut()
                .find(|existing| existing.id == agent.id)
            {
                *slot = agent.clone();
            } else {
                if config.remote_agents.len() >= MAX_REMOTE_AGENTS {
                    return Err(ConfigError::Invalid(format!(
                        "remote agent roster is full ({MAX_REMOTE_AGENTS} entries)"
                    )));
                }
                config.remote_agents.push(agent.clone());
            }
            Ok(())
        })
        .await
    }

    /// Remove the remote agent with `id`. Removing an unknown id is a no-op.
    ///
    /// # Errors
    /// Returns a storage error when the merged config cannot be persisted.
    pub async fn remove_remote_agent(&self, id: &str) -> Result<AppConfig, ConfigError> {
        self.merge_with_retry(&|config: &mut AppConfig| {
            config.remote_agents.retain(|agent| agent.id != id);
            Ok(())
        })
        .await
    }

    /// Replace the UI preference block.
    ///
    /// # Errors
    /// Returns a storage error when the merged config cannot be persisted.
    pub async fn update_ui_preferences(
        &self,
        ui: crate::schema::UiPreferences,
    ) -> Result<AppConfig, ConfigError> {
        self.merge_with_retry(&|config: &mut AppConfig| {
            config.ui = ui.clone();
            Ok(())
        })
        .await
    }

    /// Replace the session preference block.
    ///
    /// # Errors
    /// Returns a storage error when the merged config cannot be persisted.
    pub async fn update_session_preferences(
        &self,
        session: crate::schema::SessionPreferences,
    ) -> Result<AppConfig, ConfigError> {
        self.merge_with_retry(&|config: &mut AppConfig| {
            config.session = session.clone();
            Ok(())
        })
        .await
    }

    /// Re-load, merge, and commit with compare-and-swap, retrying lost races.
    ///
    /// Every attempt starts from a fresh load so the merge always applies to
    /// the latest stored config, mirroring the read-modify-write discipline
    /// of the core crate rather than a blind read-merge-write.
    async fn merge_with_retry(
        &self,
        mutate: &(dyn Fn(&mut AppConfig) -> Result<(), ConfigError> + Sync),
    ) -> Result<AppConfig, ConfigError> {
        retry_with_backoff(
            || self.try_merge(mutate),
            DEFAULT_MAX_RETRIES,
            DEFAULT_BASE_DELAY,
        )
        .await
    }

    fn try_merge(
        &self,
        mutate: &(dyn Fn(&mut AppConfig) -> Result<(), ConfigError> + Sync),
    ) -> Result<AppConfig, ConfigError> {
        let loaded = self.load();

        let mut next = loaded.config.clone();
        mutate(&mut next)?;
        next.validate()?;

        if loaded.error.is_some() {
            // The stored record was unusable; overwrite rather than race
            // against it.
            return self.save(next);
        }

        let (next, _raw) = self.stamp(next)?;
        let expected = match loaded.source {
            ConfigSource::Stored => Some(&loaded.config),
            ConfigSource::Defaults => None,
        };

        self.storage.compare_and_swap(CONFIG_KEY, expected, &next)?;
        Ok(next)
    }

    fn stamp(&self, mut config: AppConfig) -> Result<(AppConfig, String), ConfigError> {
        config.schema_version = CURRENT_SCHEMA_VERSION.to_string();
        config.updated_at = self.storage.now_ms();

        let raw = serde_json::to_string(&config)
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        if raw.len() > MAX_CONFIG_BYTES {
            return Err(ConfigError::TooLarge {
                size: raw.len(),
                limit: MAX_CONFIG_BYTES,
            });
        }
        Ok((config, raw))
    }

    fn defaults_with(error: ConfigError) -> ConfigLoaded {
        tracing::warn!("falling back to default config: {error}");
        ConfigLoaded {
            config: AppConfig::default(),
            migrated: false,
            source: ConfigSource::Defaults,
            error: Some(error),
        }
    }
}
