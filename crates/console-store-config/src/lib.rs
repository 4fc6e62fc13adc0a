//! Schema-versioned configuration store for the agent console.
//!
//! Provides:
//! - `AppConfig` - The single configuration record (agent roster + preferences)
//! - `ConfigStore` - Load with migration and fallback-to-defaults, save with stamping
//! - Migration registry - Ordered `(version, transform)` steps
//! - `compare_versions` - Dot-separated numeric version comparison

pub mod migrate;
pub mod schema;
pub mod store;
pub mod version;

pub use migrate::{CURRENT_SCHEMA_VERSION, Migration, migrations};
pub use schema::{
    AppConfig, Density, MAX_CONFIG_BYTES, MAX_REMOTE_AGENTS, RemoteAgentConfig,
    SessionPreferences, Theme, UiPreferences,
};
pub use store::{CONFIG_KEY, ConfigError, ConfigLoaded, ConfigSource, ConfigStore};
pub use version::compare_versions;
