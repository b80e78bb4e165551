//! Per-organization status events for UI subscribers.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 128;

/// Why a session ended in a way the UI must react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    MaxReconnectAttempts,
    ConflictReplaced,
    CredentialRejected,
    HandshakeFailed,
    LoggedOut,
    InvalidSession,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxReconnectAttempts => "max_reconnect_attempts",
            Self::ConflictReplaced => "conflict_replaced",
            Self::CredentialRejected => "credential_rejected",
            Self::HandshakeFailed => "handshake_failed",
            Self::LoggedOut => "logged_out",
            Self::InvalidSession => "invalid_session",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    /// A pairing token rendered as an SVG data URL.
    #[serde(rename = "pairing-code")]
    PairingCode { org_id: String, qr: String },
    #[serde(rename = "connected")]
    Connected {
        org_id: String,
        identifier: Option<String>,
    },
    #[serde(rename = "disconnected")]
    Disconnected {
        org_id: String,
        reason: DisconnectReason,
    },
}

impl BridgeEvent {
    /// Event name used for the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PairingCode { .. } => "pairing-code",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
        }
    }

    pub fn org_id(&self) -> &str {
        match self {
            Self::PairingCode { org_id, .. }
            | Self::Connected { org_id, .. }
            | Self::Disconnected { org_id, .. } => org_id,
        }
    }
}

/// Channel name for an organization.
pub fn channel_name(org_id: &str) -> String {
    format!("org-{org_id}")
}

/// Fan-out of [`BridgeEvent`]s, one broadcast channel per organization.
pub struct EventBroadcaster {
    channels: RwLock<HashMap<String, broadcast::Sender<BridgeEvent>>>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the organization's channel and subscribe to it.
    pub fn subscribe(&self, org_id: &str) -> broadcast::Receiver<BridgeEvent> {
        let mut channels = self.channels.write();
        channels
            .entry(channel_name(org_id))
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish to the organization's channel.  Returns how many subscribers
    /// received it; zero subscribers is not an error.
    pub fn publish(&self, event: BridgeEvent) -> usize {
        let channel = channel_name(event.org_id());
        tracing::debug!(channel = %channel, event = event.name(), "publishing bridge event");
        let channels = self.channels.read();
        match channels.get(&channel) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the organization's channel.  Existing receivers see `Closed`.
    pub fn remove(&self, org_id: &str) {
        self.channels.write().remove(&channel_name(org_id));
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}
