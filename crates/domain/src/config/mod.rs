mod bridge;
mod observability;
mod server;
mod storage;

pub use bridge::*;
pub use observability::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Read and parse a TOML config file.  A missing file yields the
    /// defaults so a bare `orgbridge serve` works out of the box.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: &str, message: &str| {
            errors.push(ConfigError {
                severity,
                field: field.into(),
                message: message.into(),
            });
        };

        if self.server.port == 0 {
            push(ConfigSeverity::Error, "server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            push(ConfigSeverity::Error, "server.host", "host must not be empty");
        }
        if self.server.max_concurrent_requests == 0 {
            push(
                ConfigSeverity::Error,
                "server.max_concurrent_requests",
                "at least one request must be allowed in flight",
            );
        }
        if self.server.cors.is_wildcard() {
            push(
                ConfigSeverity::Warning,
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            );
        }

        let bridge = &self.bridge;
        if !(bridge.relay_url.starts_with("ws://") || bridge.relay_url.starts_with("wss://")) {
            push(
                ConfigSeverity::Error,
                "bridge.relay_url",
                "relay_url must be a ws:// or wss:// URL",
            );
        }
        if bridge.reconnect.base_delay_ms == 0 {
            push(
                ConfigSeverity::Error,
                "bridge.reconnect.base_delay_ms",
                "base delay must be greater than 0",
            );
        }
        if bridge.reconnect.max_delay_ms < bridge.reconnect.base_delay_ms {
            push(
                ConfigSeverity::Error,
                "bridge.reconnect.max_delay_ms",
                "max delay must be >= base delay",
            );
        }
        if bridge.reconnect.max_attempts == 0 {
            push(
                ConfigSeverity::Warning,
                "bridge.reconnect.max_attempts",
                "0 disables automatic reconnection entirely",
            );
        }
        if bridge.jitter.min_ms > bridge.jitter.max_ms {
            push(
                ConfigSeverity::Error,
                "bridge.jitter",
                "min_ms must be <= max_ms",
            );
        }
        if bridge.jitter.max_ms == 0 {
            push(
                ConfigSeverity::Warning,
                "bridge.jitter.max_ms",
                "sending without jitter produces burst patterns the network may flag",
            );
        }

        if self.storage.backend == StorageBackend::Memory {
            push(
                ConfigSeverity::Warning,
                "storage.backend",
                "memory backend loses every pairing on restart",
            );
        }

        if self.observability.log_filter.trim().is_empty() {
            push(
                ConfigSeverity::Warning,
                "observability.log_filter",
                "empty filter falls back to \"info\"",
            );
        }
        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            push(
                ConfigSeverity::Error,
                "observability.sample_rate",
                "sample_rate must be between 0.0 and 1.0",
            );
        }

        errors
    }
}
