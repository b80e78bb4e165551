//! In-memory registry of live organization sessions.
//!
//! Only the [`ConnectionManager`](crate::manager::ConnectionManager) mutates
//! the registry; everything else gets read-only summaries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::ProtocolSession;

/// One organization's live session.
pub(crate) struct ConnectionEntry {
    pub org_id: String,
    /// Minted per opened session; events carrying another id are stale.
    pub session_id: Uuid,
    pub session: Arc<dyn ProtocolSession>,
    pub is_connected: bool,
    /// Last pairing token rendered as a data URL, until the session opens.
    pub pairing_code: Option<String>,
    pub identifier: Option<String>,
    pub initiating_user_id: String,
    pub opened_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    /// Cancelled to stop the event pump before the session is closed.
    pub detach: CancellationToken,
    pub pump: Option<JoinHandle<()>>,
}

impl ConnectionEntry {
    /// Stop delivering events from this session.  Safe to call from inside
    /// the pump itself when `abort_pump` is false.
    pub fn detach(&mut self, abort_pump: bool) {
        self.detach.cancel();
        if let Some(pump) = self.pump.take() {
            if abort_pump {
                pump.abort();
            }
        }
    }

    fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            org_id: self.org_id.clone(),
            session_id: self.session_id,
            is_connected: self.is_connected && !self.session.is_closed(),
            awaiting_pairing: self.pairing_code.is_some(),
            identifier: self.identifier.clone(),
            initiating_user_id: self.initiating_user_id.clone(),
            opened_at: self.opened_at,
            connected_at: self.connected_at,
            last_event_at: self.last_event_at,
        }
    }
}

/// Summary returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub org_id: String,
    pub session_id: Uuid,
    pub is_connected: bool,
    pub awaiting_pairing: bool,
    pub identifier: Option<String>,
    pub initiating_user_id: String,
    pub opened_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Liveness of an organization's entry as seen by `initialize_connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    Connected,
    InProgress,
    Stale,
}

/// Thread-safe map org id → entry.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an entry, returning whatever it replaced.
    pub(crate) fn insert(&self, entry: ConnectionEntry) -> Option<ConnectionEntry> {
        let id = entry.org_id.clone();
        tracing::info!(
            org_id = %id,
            session_id = %entry.session_id,
            user_id = %entry.initiating_user_id,
            "connection registered"
        );
        self.entries.write().insert(id, entry)
    }

    pub(crate) fn remove(&self, org_id: &str) -> Option<ConnectionEntry> {
        let removed = self.entries.write().remove(org_id);
        if let Some(entry) = &removed {
            tracing::info!(org_id = %org_id, session_id = %entry.session_id, "connection removed");
        }
        removed
    }

    /// Remove the entry only if it still belongs to `session_id`.
    pub(crate) fn remove_session(&self, org_id: &str, session_id: Uuid) -> Option<ConnectionEntry> {
        let mut entries = self.entries.write();
        if entries.get(org_id).is_some_and(|e| e.session_id == session_id) {
            tracing::info!(org_id = %org_id, session_id = %session_id, "connection removed");
            entries.remove(org_id)
        } else {
            None
        }
    }

    pub(crate) fn drain(&self) -> Vec<ConnectionEntry> {
        self.entries.write().drain().map(|(_, e)| e).collect()
    }

    /// Apply `f` to the entry if it still belongs to `session_id`.
    pub(crate) fn update<R>(
        &self,
        org_id: &str,
        session_id: Uuid,
        f: impl FnOnce(&mut ConnectionEntry) -> R,
    ) -> Option<R> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(org_id).filter(|e| e.session_id == session_id)?;
        entry.last_event_at = Some(Utc::now());
        Some(f(entry))
    }

    pub(crate) fn state(&self, org_id: &str) -> Option<EntryState> {
        self.entries.read().get(org_id).map(|e| {
            if e.session.is_closed() {
                EntryState::Stale
            } else if e.is_connected {
                EntryState::Connected
            } else {
                EntryState::InProgress
            }
        })
    }

    pub(crate) fn is_current(&self, org_id: &str, session_id: Uuid) -> bool {
        self.entries
            .read()
            .get(org_id)
            .is_some_and(|e| e.session_id == session_id)
    }

    /// The session of a live, connected entry.
    pub(crate) fn connected_session(&self, org_id: &str) -> Option<(Uuid, Arc<dyn ProtocolSession>)> {
        self.entries
            .read()
            .get(org_id)
            .filter(|e| e.is_connected && !e.session.is_closed())
            .map(|e| (e.session_id, e.session.clone()))
    }

    pub fn contains(&self, org_id: &str) -> bool {
        self.entries.read().contains_key(org_id)
    }

    pub fn pairing_code(&self, org_id: &str) -> Option<String> {
        self.entries.read().get(org_id).and_then(|e| e.pairing_code.clone())
    }

    pub fn get(&self, org_id: &str) -> Option<ConnectionSummary> {
        self.entries.read().get(org_id).map(ConnectionEntry::summary)
    }

    /// All entries, sorted by org id.
    pub fn list(&self) -> Vec<ConnectionSummary> {
        let mut list: Vec<ConnectionSummary> =
            self.entries.read().values().map(ConnectionEntry::summary).collect();
        list.sort_by(|a, b| a.org_id.cmp(&b.org_id));
        list
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
