use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bridge (connection manager) settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// WebSocket URL of the protocol relay sidecar.
    #[serde(default = "d_relay_url")]
    pub relay_url: String,
    /// Delay before a fresh pairing flow is started after the network
    /// rejected stored credentials.
    #[serde(default = "d_1000")]
    pub pairing_restart_delay_ms: u64,
    /// Upper bound on a single outbound send round-trip.
    #[serde(default = "d_30000")]
    pub send_timeout_ms: u64,
    /// Domain appended to bare phone-number addresses.
    #[serde(default = "d_address_suffix")]
    pub address_suffix: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub jitter: JitterConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            relay_url: d_relay_url(),
            pairing_restart_delay_ms: 1000,
            send_timeout_ms: 30_000,
            address_suffix: d_address_suffix(),
            reconnect: ReconnectConfig::default(),
            jitter: JitterConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn pairing_restart_delay(&self) -> Duration {
        Duration::from_millis(self.pairing_restart_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Exponential back-off applied per organization after a recoverable close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_3000")]
    pub base_delay_ms: u64,
    #[serde(default = "d_48000")]
    pub max_delay_ms: u64,
    /// Attempts allowed before auto-reconnect is disabled for the org.
    #[serde(default = "d_5")]
    pub max_attempts: u32,
    /// Quiet period after which the attempt counter starts over.
    #[serde(default = "d_300")]
    pub reset_window_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 3000,
            max_delay_ms: 48_000,
            max_attempts: 5,
            reset_window_secs: 300,
        }
    }
}

/// Randomized pre-send delay window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterConfig {
    #[serde(default = "d_2000")]
    pub min_ms: u64,
    #[serde(default = "d_5000")]
    pub max_ms: u64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_ms: 2000,
            max_ms: 5000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_relay_url() -> String {
    "ws://127.0.0.1:7310/v1/relay".into()
}
fn d_address_suffix() -> String {
    "s.whatsapp.net".into()
}
fn d_1000() -> u64 {
    1000
}
fn d_2000() -> u64 {
    2000
}
fn d_3000() -> u64 {
    3000
}
fn d_5000() -> u64 {
    5000
}
fn d_30000() -> u64 {
    30_000
}
fn d_48000() -> u64 {
    48_000
}
fn d_5() -> u32 {
    5
}
fn d_300() -> u64 {
    300
}
