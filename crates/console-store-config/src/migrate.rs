//! Ordered schema migration registry.
//!
//! Each step is an independent `(version, transform)` pair operating on the
//! raw JSON object, so a stored config from any earlier release can be
//! brought forward one release at a time and every step stays unit-testable
//! on its own.

use std::cmp::Ordering;

use serde_json::{Map, Value, json};

use crate::{store::ConfigError, version::compare_versions};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: &str = "1.2.0";

/// One migration step.
pub struct Migration {
    /// Version this step migrates *to*.
    pub version: &'static str,
    apply: fn(&mut Map<String, Value>) -> Result<(), ConfigError>,
}

impl Migration {
    /// Apply this step to a raw config object.
    ///
    /// # Errors
    /// Returns [`ConfigError::Migration`] when the stored shape cannot be
    /// transformed.
    pub fn apply(&self, config: &mut Map<String, Value>) -> Result<(), ConfigError> {
        (self.apply)(config)
    }
}

/// The registry, ordered ascending by target version.
#[must_use]
pub fn migrations() -> &'static [Migration] {
    &[
        Migration {
            version: "1.1.0",
            apply: to_1_1_0,
        },
        Migration {
            version: "1.2.0",
            apply: to_1_2_0,
        },
    ]
}

/// Run every step in `(stored, target]` in ascending order.
///
/// Returns whether any step ran. Steps at or below the stored version, or
/// above the target, are skipped; each applied step stamps `schemaVersion`,
/// so a partial failure leaves an honestly-labelled intermediate form.
///
/// # Errors
/// Returns the failing step's [`ConfigError::Migration`].
pub fn run_migrations(
    config: &mut Map<String, Value>,
    stored_version: &str,
    target_version: &str,
) -> Result<bool, ConfigError> {
    let mut migrated = false;

    for step in migrations() {
        if compare_versions(step.version, stored_version) != Ordering::Greater {
            continue;
        }
        if compare_versions(step.version, target_version) == Ordering::Greater {
            continue;
        }

        step.apply(config)?;
        config.insert(
            "schemaVersion".to_string(),
            Value::String(step.version.to_string()),
        );
        migrated = true;
        tracing::debug!(version = step.version, "applied config migration");
    }

    Ok(migrated)
}

/// 1.1.0 moved the legacy top-level `agents` array to `remoteAgents` and
/// introduced the `session` preference block.
fn to_1_1_0(config: &mut Map<String, Value>) -> Result<(), ConfigError> {
    if let Some(agents) = config.remove("agents") {
        config.entry("remoteAgents").or_insert(agents);
    }
    config
        .entry("remoteAgents")
        .or_insert_with(|| Value::Array(Vec::new()));

    config.entry("session").or_insert_with(|| {
        json!({
            "autoSave": true,
            "autoSaveIntervalSecs": 30,
            "confirmDiscard": true,
        })
    });

    Ok(())
}

/// 1.2.0 added the per-agent `enabled` flag and `ui.showTimestamps`.
fn to_1_2_0(config: &mut Map<String, Value>) -> Result<(), ConfigError> {
    let agents = config
        .get_mut("remoteAgents")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| ConfigError::Migration {
            version: "1.2.0".to_string(),
            message: "remoteAgents is not an array".to_string(),
        })?;

    for agent in agents {
        let Some(agent) = agent.as_object_mut() else {
            return Err(ConfigError::Migration {
                version: "1.2.0".to_string(),
                message: "remote agent entry is not an object".to_string(),
            });
        };
        agent.entry("enabled").or_insert(Value::Bool(true));
    }

    if let Some(ui) = config.get_mut("ui").and_then(Value::as_object_mut) {
        ui.entry("showTimestamps").or_insert(Value::Bool(true));
    }

    Ok(())
}
