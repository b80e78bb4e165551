use chrono::{DateTime, Utc};
use serde::Serialize;

/// One persisted row: `bridge_auth_state`.
///
/// Credentials and keys are kept in their encoded (binary-safe JSON) form;
/// decoding happens in [`AuthStateStore`](crate::store::AuthStateStore).
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRecord {
    pub organization_id: String,
    pub is_connected: bool,
    pub connected_identifier: Option<String>,
    pub auth_credentials: Option<String>,
    pub auth_keys: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AuthRecord {
    pub fn empty(org_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            organization_id: org_id.to_owned(),
            is_connected: false,
            connected_identifier: None,
            auth_credentials: None,
            auth_keys: None,
            last_connected_at: None,
            last_disconnected_at: None,
            updated_at: now,
        }
    }

    pub fn connection(&self) -> ConnectionRecord {
        ConnectionRecord {
            is_connected: self.is_connected,
            connected_identifier: self.connected_identifier.clone(),
            last_connected_at: self.last_connected_at,
            last_disconnected_at: self.last_disconnected_at,
            updated_at: self.updated_at,
        }
    }
}

/// The connection-status columns of a row, without key material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionRecord {
    pub is_connected: bool,
    pub connected_identifier: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
