//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use sha2::{Digest, Sha256};

use ob_auth_store::{AuthRepository, AuthStateStore, MemoryRepository, SqliteRepository};
use ob_bridge::{ConnectionManager, ManagerSettings, ProtocolEngine, RelayEngine};
use ob_domain::config::{Config, ConfigSeverity, StorageBackend};

use crate::state::AppState;

/// Validate config, open the auth-state store, wire the connection manager
/// to the relay engine and return a fully-built [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Auth-state repository ────────────────────────────────────────
    let repo: Arc<dyn AuthRepository> = match config.storage.backend {
        StorageBackend::Sqlite => {
            let path = config.storage.sqlite_path.to_string_lossy().into_owned();
            let repo = SqliteRepository::connect(&path)
                .await
                .with_context(|| format!("opening auth-state database {path}"))?;
            Arc::new(repo)
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory auth-state storage, pairings will not survive a restart");
            Arc::new(MemoryRepository::new())
        }
    };
    let store = Arc::new(AuthStateStore::with_generated_credentials(repo));

    // ── Protocol engine ──────────────────────────────────────────────
    let engine: Arc<dyn ProtocolEngine> = Arc::new(RelayEngine::new(
        config.bridge.relay_url.clone(),
        config.bridge.send_timeout(),
    ));
    tracing::info!(url = %config.bridge.relay_url, "relay engine ready");

    let manager = ConnectionManager::new(store, engine, ManagerSettings::from_config(&config.bridge));

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
            Some(token) => {
                tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            None => {
                tracing::warn!(
                    "API bearer-token auth DISABLED, set the {env_var} env var to protect the API"
                );
                None
            }
        }
    };

    Ok(AppState {
        config,
        manager,
        api_token_hash,
        started_at: Instant::now(),
    })
}

/// Spawn long-running background work.  Currently only the startup restore
/// of organizations persisted as connected.
pub fn spawn_background_tasks(state: &AppState) {
    let manager = state.manager.clone();
    tokio::spawn(async move {
        let summary = manager.restore_connections().await;
        if summary.failed > 0 {
            tracing::warn!(
                failed = summary.failed,
                attempted = summary.attempted,
                "some connections could not be restored"
            );
        }
    });
    tracing::info!("background tasks spawned");
}
