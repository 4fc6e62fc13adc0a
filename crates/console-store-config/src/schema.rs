//! Configuration record shapes and structural validation.

use serde::{Deserialize, Serialize};

use crate::store::ConfigError;

/// Hard ceiling on the serialized config blob.
pub const MAX_CONFIG_BYTES: usize = 100 * 1024;

/// Maximum entries in the remote agent roster.
pub const MAX_REMOTE_AGENTS: usize = 20;

/// The single persisted configuration record.
///
/// `schemaVersion` is a semantic schema version driving the migration
/// pipeline, not an optimistic-lock counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub schema_version: String,
    pub updated_at: i64,
    pub remote_agents: Vec<RemoteAgentConfig>,
    pub ui: UiPreferences,
    pub session: SessionPreferences,
}

/// One entry in the remote agent roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAgentConfig {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub enabled: bool,
}

/// Console appearance preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPreferences {
    pub theme: Theme,
    pub density: Density,
    pub show_timestamps: bool,
    pub sidebar_collapsed: bool,
}

/// Session handling preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPreferences {
    pub auto_save: bool,
    pub auto_save_interval_secs: u32,
    pub confirm_discard: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    Dark,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Density {
    Comfortable,
    Compact,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: crate::migrate::CURRENT_SCHEMA_VERSION.to_string(),
            updated_at: 0,
            remote_agents: Vec::new(),
            ui: UiPreferences::default(),
            session: SessionPreferences::default(),
        }
    }
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            density: Density::Comfortable,
            show_timestamps: true,
            sidebar_collapsed: false,
        }
    }
}

impl Default for SessionPreferences {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_save_interval_secs: 30,
            confirm_discard: true,
        }
    }
}

impl AppConfig {
    /// Check the semantic constraints serde cannot express.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when the roster exceeds its ceiling,
    /// agent ids collide, or an agent entry is incomplete.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version.is_empty() {
            return Err(ConfigError::Invalid("schemaVersion is empty".to_string()));
        }

        if self.remote_agents.len() > MAX_REMOTE_AGENTS {
            return Err(ConfigError::Invalid(format!(
                "remote agent roster holds {} entries, over the {MAX_REMOTE_AGENTS} ceiling",
                self.remote_agents.len()
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.remote_agents {
            agent.validate()?;
            if !seen.insert(agent.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate remote agent id: {}",
                    agent.id
                )));
            }
        }

        if self.session.auto_save && self.session.auto_save_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "autoSaveIntervalSecs must be positive when autoSave is on".to_string(),
            ));
        }

        Ok(())
    }
}

impl RemoteAgentConfig {
    /// Check that the entry identifies a reachable agent.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when id, name, or endpoint is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Invalid("remote agent id is empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "remote agent {} has an empty name",
                self.id
            )));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "remote agent {} has an empty endpoint",
                self.id
            )));
        }
        Ok(())
    }
}
