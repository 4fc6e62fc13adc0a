//! End-to-end tour of the persistence core against the in-memory backend.
//!
//! Run with: cargo run -p console-demo

use anyhow::Context as _;
use console_store_config::{ConfigStore, RemoteAgentConfig};
use console_store_core::{MemoryStore, SafeStorage, retry::DEFAULT_MAX_RETRIES};
use console_store_session::{CreateOptions, SessionMode, SessionStore, UpdateOptions};
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let storage = SafeStorage::new(MemoryStore::new());

    // Versioned writes and the read-modify-write loop.
    let version = storage
        .write_versioned("demo.counter", 1_u32, 0)
        .context("initial versioned write")?;
    tracing::info!(version, "created demo.counter");

    let version = storage
        .read_modify_write::<u32, _>("demo.counter", |n| n.unwrap_or(0) + 1, DEFAULT_MAX_RETRIES)
        .await
        .context("read-modify-write")?;
    tracing::info!(version, "incremented demo.counter");

    // A transaction that commits, then rolls back.
    let mut tx = storage.transaction();
    tx.set("demo.a", &json!({"panel": "timeline"}))?
        .set("demo.b", &json!({"panel": "filters"}))?;
    let report = tx.commit()?;
    tracing::info!(completed = report.completed, "transaction committed");
    tx.rollback()?;
    tracing::info!(
        restored = storage.get_item::<serde_json::Value>("demo.a").is_none(),
        "transaction rolled back"
    );

    // Configuration: defaults, then a roster update through the CAS path.
    let config_store = ConfigStore::new(storage.clone());
    let loaded = config_store.load();
    tracing::info!(source = ?loaded.source, "loaded config");

    let config = config_store
        .upsert_remote_agent(RemoteAgentConfig {
            id: "staging-runner".to_string(),
            name: "Staging runner".to_string(),
            endpoint: "https://agents.example/staging".to_string(),
            auth_token: None,
            enabled: true,
        })
        .await
        .context("upsert remote agent")?;
    tracing::info!(agents = config.remote_agents.len(), "roster updated");

    // Sessions: create, update, recover.
    let sessions = SessionStore::new(storage);
    let meta = sessions.create_session(
        "smoke test run",
        &json!({"events": []}),
        CreateOptions {
            mode: Some(SessionMode::Live),
        },
    )?;
    sessions.set_active_session(&meta.id)?;

    sessions.update_session(
        &meta.id,
        &json!({"events": ["agent.connected"]}),
        UpdateOptions {
            event_count: Some(1),
            has_unsaved_changes: Some(true),
            ..UpdateOptions::default()
        },
    )?;

    let recovered = sessions
        .get_recoverable_session::<Value>()
        .context("active session should be recoverable")?;
    tracing::info!(
        id = %recovered.metadata.id,
        events = recovered.metadata.event_count,
        "recovered active session"
    );

    for session in sessions.list_sessions() {
        tracing::info!(name = %session.name, updated_at = session.updated_at, "listed session");
    }

    Ok(())
}
