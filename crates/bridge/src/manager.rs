//! Connection lifecycle controller.
//!
//! One [`ConnectionManager`] per process owns every organization's session.
//! It opens sessions through the [`ProtocolEngine`], pumps their events,
//! decides what each close means, drives reconnects and pairing restarts,
//! and keeps the persisted connection flag in step with reality.
//!
//! Per-org transitions run under an [`OrgGuard`]; each session's events are
//! handled one at a time by that session's pump task.  Reconnect timers and
//! close handling carry the org's [`Epoch`], so nothing scheduled before a
//! `disconnect` or `shutdown` can bring a session back afterwards.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ob_auth_store::{AuthStateStore, CredentialPatch};
use ob_domain::config::BridgeConfig;
use ob_domain::trace::TraceEvent;

use crate::classify::{CloseAction, CloseSignal};
use crate::dispatch::{MessageDispatcher, SendFailure, SendOutcome};
use crate::engine::{ProtocolEngine, SentMessage, SessionEvent};
use crate::events::{BridgeEvent, DisconnectReason, EventBroadcaster};
use crate::org_lock::{Epoch, OrgGuard, OrgLocks};
use crate::qr::render_pairing_code;
use crate::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectTracker};
use crate::registry::{ConnectionEntry, ConnectionRegistry, EntryState};
use crate::timers::ReconnectTimers;

/// User id recorded for connections the process opens on its own.
pub const SYSTEM_USER: &str = "system";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings and reporting types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub reconnect: ReconnectPolicy,
    pub pairing_restart_delay: Duration,
    pub dispatcher: MessageDispatcher,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl ManagerSettings {
    pub fn from_config(cfg: &BridgeConfig) -> Self {
        Self {
            reconnect: ReconnectPolicy::from(&cfg.reconnect),
            pairing_restart_delay: cfg.pairing_restart_delay(),
            dispatcher: MessageDispatcher::from_config(cfg),
        }
    }
}

/// Where an organization is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Pairing,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub org_id: String,
    pub is_connected: bool,
    pub phase: ConnectionPhase,
    pub connected_identifier: Option<String>,
    /// QR data URL while waiting for the user to scan.
    pub pairing_code: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub attempted: usize,
    pub restored: usize,
    pub failed: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConnectionManager {
    store: Arc<AuthStateStore>,
    engine: Arc<dyn ProtocolEngine>,
    events: EventBroadcaster,
    registry: ConnectionRegistry,
    reconnect: ReconnectTracker,
    timers: ReconnectTimers,
    locks: OrgLocks,
    dispatcher: MessageDispatcher,
    pairing_restart_delay: Duration,
    /// Handed to pump and timer tasks so they never keep the manager alive.
    this: Weak<Self>,
}

impl ConnectionManager {
    pub fn new(
        store: Arc<AuthStateStore>,
        engine: Arc<dyn ProtocolEngine>,
        settings: ManagerSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            store,
            engine,
            events: EventBroadcaster::new(),
            registry: ConnectionRegistry::new(),
            reconnect: ReconnectTracker::new(settings.reconnect),
            timers: ReconnectTimers::new(),
            locks: OrgLocks::new(),
            dispatcher: settings.dispatcher,
            pairing_restart_delay: settings.pairing_restart_delay,
            this: this.clone(),
        })
    }

    pub fn store(&self) -> &Arc<AuthStateStore> {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn subscribe(&self, org_id: &str) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe(org_id)
    }

    /// Number of reconnect or re-pair timers waiting to fire.
    pub fn pending_reconnects(&self) -> usize {
        self.timers.len()
    }

    async fn lock(&self, org_id: &str) -> Option<OrgGuard> {
        match self.locks.acquire(org_id).await {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::error!(org_id = %org_id, error = %e, "failed to acquire org lock");
                None
            }
        }
    }

    // ── initialize ─────────────────────────────────────────────────

    /// Open a session for the organization unless one is already live or
    /// being established.  Returns `false` only when loading auth state or
    /// opening the session failed.
    pub async fn initialize_connection(&self, org_id: &str, user_id: &str) -> bool {
        self.initialize(org_id, user_id, None).await
    }

    /// `scheduled_in` is the epoch a timer was armed under; a teardown since
    /// then turns the call into a no-op.
    async fn initialize(&self, org_id: &str, user_id: &str, scheduled_in: Option<Epoch>) -> bool {
        let Some(guard) = self.lock(org_id).await else {
            return false;
        };
        if let Some(epoch) = scheduled_in {
            if !guard.admits(epoch) {
                tracing::debug!(org_id = %org_id, "scheduled reopen superseded by teardown");
                return true;
            }
        }

        match self.registry.state(org_id) {
            Some(EntryState::Connected) => {
                tracing::debug!(org_id = %org_id, "already connected");
                return true;
            }
            Some(EntryState::InProgress) => {
                tracing::debug!(org_id = %org_id, "connection already in progress");
                return true;
            }
            Some(EntryState::Stale) => {
                tracing::warn!(org_id = %org_id, "purging stale connection entry");
                if let Some(mut entry) = self.registry.remove(org_id) {
                    entry.detach(true);
                    entry.session.close().await;
                }
            }
            None => {}
        }
        self.timers.cancel(org_id);

        let loaded = match self.store.load(org_id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(org_id = %org_id, error = %e, "failed to load auth state");
                return false;
            }
        };
        let opened = match self
            .engine
            .open(org_id, loaded.credentials, loaded.key_store)
            .await
        {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!(org_id = %org_id, error = %e, "failed to open protocol session");
                return false;
            }
        };

        let session_id = Uuid::new_v4();
        let detach = CancellationToken::new();
        let pump = self.spawn_pump(org_id, session_id, opened.events, detach.clone());
        self.registry.insert(ConnectionEntry {
            org_id: org_id.to_owned(),
            session_id,
            session: opened.session,
            is_connected: false,
            pairing_code: None,
            identifier: None,
            initiating_user_id: user_id.to_owned(),
            opened_at: Utc::now(),
            connected_at: None,
            last_event_at: None,
            detach,
            pump: Some(pump),
        });

        TraceEvent::SessionOpened {
            org_id: org_id.to_owned(),
            session_id: session_id.to_string(),
            user_id: user_id.to_owned(),
        }
        .emit();
        true
    }

    fn spawn_pump(
        &self,
        org_id: &str,
        session_id: Uuid,
        mut events: mpsc::Receiver<SessionEvent>,
        detach: CancellationToken,
    ) -> JoinHandle<()> {
        let this = self.this.clone();
        let org = org_id.to_owned();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = detach.cancelled() => break,
                    ev = events.recv() => ev.unwrap_or_else(|| {
                        SessionEvent::Close(CloseSignal::new(None, "event stream ended"))
                    }),
                };
                let is_close = matches!(event, SessionEvent::Close(_));
                let Some(manager) = this.upgrade() else { break };
                manager.handle_event(&org, session_id, event, &detach).await;
                if is_close {
                    break;
                }
            }
            tracing::debug!(org_id = %org, session_id = %session_id, "event pump stopped");
        })
    }

    // ── session events ─────────────────────────────────────────────

    async fn handle_event(
        &self,
        org_id: &str,
        session_id: Uuid,
        event: SessionEvent,
        detach: &CancellationToken,
    ) {
        let Some(guard) = self.lock(org_id).await else {
            return;
        };
        if detach.is_cancelled() || !self.registry.is_current(org_id, session_id) {
            tracing::debug!(org_id = %org_id, session_id = %session_id, "dropping event from replaced session");
            return;
        }

        match event {
            SessionEvent::Pairing { code } => self.on_pairing(org_id, session_id, &code),
            SessionEvent::Open { identifier } => self.on_open(org_id, session_id, identifier).await,
            SessionEvent::CredentialsUpdate(patch) => self.on_credentials_update(org_id, patch).await,
            SessionEvent::Close(signal) => {
                self.on_close(org_id, session_id, signal, guard.epoch()).await
            }
        }
    }

    fn on_pairing(&self, org_id: &str, session_id: Uuid, code: &str) {
        let qr = match render_pairing_code(code) {
            Ok(qr) => qr,
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "failed to render pairing code");
                return;
            }
        };
        self.registry
            .update(org_id, session_id, |e| e.pairing_code = Some(qr.clone()));
        tracing::info!(org_id = %org_id, "pairing code issued");
        self.events.publish(BridgeEvent::PairingCode {
            org_id: org_id.to_owned(),
            qr,
        });
    }

    async fn on_open(&self, org_id: &str, session_id: Uuid, identifier: Option<String>) {
        let identifier = self
            .registry
            .update(org_id, session_id, |e| {
                let identifier = identifier.or_else(|| e.session.identifier());
                e.is_connected = true;
                e.pairing_code = None;
                e.identifier = identifier.clone();
                e.connected_at = Some(Utc::now());
                identifier
            })
            .flatten();

        self.reconnect.reset(org_id);
        if let Err(e) = self.store.mark_connected(org_id, identifier.as_deref()).await {
            tracing::error!(org_id = %org_id, error = %e, "failed to persist connected state");
        }

        TraceEvent::SessionConnected {
            org_id: org_id.to_owned(),
            identifier: identifier.clone().unwrap_or_default(),
        }
        .emit();
        self.events.publish(BridgeEvent::Connected {
            org_id: org_id.to_owned(),
            identifier,
        });
    }

    async fn on_credentials_update(&self, org_id: &str, patch: CredentialPatch) {
        if let Err(e) = self.store.save_credentials(org_id, patch).await {
            tracing::error!(org_id = %org_id, error = %e, "failed to persist credential update");
        }
    }

    async fn on_close(&self, org_id: &str, session_id: Uuid, signal: CloseSignal, epoch: Epoch) {
        let class = signal.classify();
        tracing::info!(
            org_id = %org_id,
            status_code = ?signal.status_code,
            message = %signal.message,
            classification = class.label(),
            "session closed"
        );
        TraceEvent::SessionClosed {
            org_id: org_id.to_owned(),
            status_code: signal.status_code,
            classification: class.label().to_owned(),
        }
        .emit();

        // Running inside this session's pump: detach without aborting it.
        let user_id = match self.registry.remove_session(org_id, session_id) {
            Some(mut entry) => {
                entry.detach(false);
                entry.session.close().await;
                entry.initiating_user_id
            }
            None => SYSTEM_USER.to_owned(),
        };

        match class.action() {
            CloseAction::Reconnect => self.schedule_reconnect(org_id, &user_id, epoch).await,
            CloseAction::RestartPairing(reason) => {
                self.wipe(org_id, reason.as_str()).await;
                self.publish_disconnected(org_id, reason);
                self.schedule_repair(org_id, &user_id, epoch).await;
            }
            CloseAction::Terminal { reason, wipe } => {
                self.reconnect.reset(org_id);
                if wipe {
                    let label = reason.map(|r| r.as_str()).unwrap_or("terminal_close");
                    self.wipe(org_id, label).await;
                } else {
                    self.persist_disconnected(org_id).await;
                }
                if let Some(reason) = reason {
                    self.publish_disconnected(org_id, reason);
                }
            }
        }
    }

    // ── reconnect ──────────────────────────────────────────────────

    async fn schedule_reconnect(&self, org_id: &str, user_id: &str, epoch: Epoch) {
        if !self.locks.is_current(org_id, epoch) {
            tracing::debug!(org_id = %org_id, "organization torn down, not reconnecting");
            return;
        }
        match self.reconnect.register_attempt(org_id, Instant::now()) {
            ReconnectDecision::Retry { attempt, delay } => {
                tracing::info!(
                    org_id = %org_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                TraceEvent::ReconnectScheduled {
                    org_id: org_id.to_owned(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                }
                .emit();
                self.schedule_initialize(org_id, user_id, delay, epoch);
            }
            ReconnectDecision::Exhausted { attempts } => {
                self.give_up(org_id, attempts).await;
            }
        }
    }

    /// Pairing restarts share the reconnect budget: the first comes after
    /// `pairing_restart_delay`, later ones back off like reconnects until
    /// an `open` resets the count.
    async fn schedule_repair(&self, org_id: &str, user_id: &str, epoch: Epoch) {
        if !self.locks.is_current(org_id, epoch) {
            tracing::debug!(org_id = %org_id, "organization torn down, not restarting pairing");
            return;
        }
        match self.reconnect.register_attempt(org_id, Instant::now()) {
            ReconnectDecision::Retry { attempt, delay } => {
                let delay = if attempt == 1 {
                    self.pairing_restart_delay
                } else {
                    delay.max(self.pairing_restart_delay)
                };
                tracing::info!(
                    org_id = %org_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "restarting pairing"
                );
                self.schedule_initialize(org_id, user_id, delay, epoch);
            }
            ReconnectDecision::Exhausted { attempts } => {
                self.give_up(org_id, attempts).await;
            }
        }
    }

    async fn give_up(&self, org_id: &str, attempts: u32) {
        tracing::warn!(org_id = %org_id, attempts, "max reconnect attempts reached, giving up");
        TraceEvent::ReconnectExhausted {
            org_id: org_id.to_owned(),
            attempts,
        }
        .emit();
        self.persist_disconnected(org_id).await;
        self.publish_disconnected(org_id, DisconnectReason::MaxReconnectAttempts);
    }

    fn schedule_initialize(&self, org_id: &str, user_id: &str, delay: Duration, epoch: Epoch) {
        if !self.locks.is_current(org_id, epoch) {
            return;
        }
        let this = self.this.clone();
        let org = org_id.to_owned();
        let user = user_id.to_owned();
        self.timers.schedule(org_id, delay, async move {
            let Some(manager) = this.upgrade() else { return };
            if !manager.locks.is_current(&org, epoch) {
                return;
            }
            if !manager.initialize(&org, &user, Some(epoch)).await {
                manager.retry_after_failed_open(&org, &user, epoch).await;
            }
        });
    }

    /// A timer-driven initialize failed before any session existed; count
    /// it as another attempt.
    async fn retry_after_failed_open(&self, org_id: &str, user_id: &str, epoch: Epoch) {
        let Some(guard) = self.lock(org_id).await else {
            return;
        };
        if !guard.admits(epoch) || self.registry.contains(org_id) || self.timers.is_pending(org_id) {
            return;
        }
        self.schedule_reconnect(org_id, user_id, epoch).await;
    }

    // ── explicit operations ────────────────────────────────────────

    /// Log the device out and wipe the organization's auth state.  Succeeds
    /// even when no session is live.
    pub async fn disconnect(&self, org_id: &str) -> bool {
        let Some(_guard) = self.lock(org_id).await else {
            return false;
        };
        self.locks.advance(org_id);
        self.timers.cancel(org_id);
        self.reconnect.reset(org_id);

        if let Some(mut entry) = self.registry.remove(org_id) {
            entry.detach(true);
            if let Err(e) = entry.session.logout().await {
                tracing::warn!(org_id = %org_id, error = %e, "logout failed, continuing with disconnect");
            }
            entry.session.close().await;
        }

        if !self.wipe(org_id, "logged_out").await {
            return false;
        }
        self.publish_disconnected(org_id, DisconnectReason::LoggedOut);
        true
    }

    /// Live session first, then the persisted flag.  A persisted "connected"
    /// with no live session and nothing in flight is cleared.
    pub async fn is_connected(&self, org_id: &str) -> bool {
        match self.registry.state(org_id) {
            Some(EntryState::Connected) => return true,
            Some(EntryState::InProgress) => return false,
            Some(EntryState::Stale) | None => {}
        }

        let record = match self.store.connection_record(org_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "failed to read connection record");
                return false;
            }
        };
        if record.is_some_and(|r| r.is_connected) {
            if self.timers.is_pending(org_id) || self.locks.is_held(org_id) || self.registry.contains(org_id) {
                return false;
            }
            tracing::info!(org_id = %org_id, "clearing stale persisted connected flag");
            self.persist_disconnected(org_id).await;
        }
        false
    }

    pub async fn get_connection_info(&self, org_id: &str) -> ConnectionInfo {
        let is_connected = self.is_connected(org_id).await;
        let record = match self.store.connection_record(org_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "failed to read connection record");
                None
            }
        };
        let pairing_code = self.registry.pairing_code(org_id);

        let phase = match self.registry.state(org_id) {
            Some(EntryState::Connected) => ConnectionPhase::Connected,
            Some(EntryState::InProgress) if pairing_code.is_some() => ConnectionPhase::Pairing,
            Some(EntryState::InProgress) => ConnectionPhase::Connecting,
            _ if self.timers.is_pending(org_id) => ConnectionPhase::Reconnecting,
            _ => ConnectionPhase::Idle,
        };

        let live_identifier = self.registry.get(org_id).and_then(|s| s.identifier);
        ConnectionInfo {
            org_id: org_id.to_owned(),
            is_connected,
            phase,
            connected_identifier: live_identifier
                .or_else(|| record.as_ref().and_then(|r| r.connected_identifier.clone())),
            pairing_code,
            last_connected_at: record.as_ref().and_then(|r| r.last_connected_at),
            last_disconnected_at: record.as_ref().and_then(|r| r.last_disconnected_at),
            reconnect_attempts: self.reconnect.attempts(org_id),
        }
    }

    /// Re-open every organization persisted as connected.
    pub async fn restore_connections(&self) -> RestoreSummary {
        let orgs = match self.store.connected_orgs().await {
            Ok(orgs) => orgs,
            Err(e) => {
                tracing::error!(error = %e, "failed to list connected organizations");
                return RestoreSummary::default();
            }
        };
        tracing::info!(count = orgs.len(), "restoring connections");

        let results = join_all(
            orgs.iter()
                .map(|org| self.initialize_connection(org, SYSTEM_USER)),
        )
        .await;

        let restored = results.iter().filter(|ok| **ok).count();
        for (org, ok) in orgs.iter().zip(&results) {
            if !ok {
                tracing::warn!(org_id = %org, "failed to restore connection");
            }
        }
        let summary = RestoreSummary {
            attempted: orgs.len(),
            restored,
            failed: orgs.len() - restored,
        };
        tracing::info!(
            attempted = summary.attempted,
            restored = summary.restored,
            failed = summary.failed,
            "connection restore finished"
        );
        summary
    }

    /// Close any live session (without logout) and wipe auth state.
    pub async fn clear_auth_state(&self, org_id: &str) -> bool {
        let Some(_guard) = self.lock(org_id).await else {
            return false;
        };
        self.locks.advance(org_id);
        self.timers.cancel(org_id);
        self.reconnect.reset(org_id);
        if let Some(mut entry) = self.registry.remove(org_id) {
            entry.detach(true);
            entry.session.close().await;
        }
        self.wipe(org_id, "cleared").await
    }

    /// Disconnect, then delete the organization's row and event channel.
    pub async fn cleanup_organization(&self, org_id: &str) -> bool {
        let disconnected = self.disconnect(org_id).await;
        let deleted = match self.store.delete(org_id).await {
            Ok(existed) => {
                tracing::info!(org_id = %org_id, existed, "organization auth state deleted");
                true
            }
            Err(e) => {
                tracing::error!(org_id = %org_id, error = %e, "failed to delete organization auth state");
                false
            }
        };
        self.events.remove(org_id);
        self.locks.forget(org_id);
        disconnected && deleted
    }

    /// Cancel every timer and close every session.  Persisted flags are left
    /// alone so the next start restores the same organizations.
    ///
    /// Transitions already running are waited for; none of them can schedule
    /// new work once the epochs have been advanced.
    pub async fn shutdown(&self) {
        self.locks.advance_all();
        let mut timers = self.timers.cancel_all();
        let mut sessions = self.close_all().await;

        self.locks.quiesce().await;
        // A user-initiated initialize that was already past its checks may
        // have registered a session while we waited.
        timers += self.timers.cancel_all();
        sessions += self.close_all().await;

        self.reconnect.clear();
        tracing::info!(timers, sessions, "connection manager shut down");
    }

    async fn close_all(&self) -> usize {
        let entries = self.registry.drain();
        let count = entries.len();
        for mut entry in entries {
            entry.detach(true);
            entry.session.close().await;
        }
        count
    }

    // ── dispatch ───────────────────────────────────────────────────

    /// Send a text message from the organization's linked account.
    pub async fn send_message(&self, org_id: &str, to: &str, text: &str) -> SendOutcome {
        let Some((session_id, session)) = self.registry.connected_session(org_id) else {
            tracing::debug!(org_id = %org_id, "send rejected, not connected");
            return self.record_send(org_id, Duration::ZERO, Err(SendFailure::NotConnected));
        };

        let (jitter, result) = self.dispatcher.send(org_id, session.as_ref(), to, text).await;
        if matches!(result, Err(SendFailure::SessionCorrupted)) {
            self.evict_corrupted(org_id, session_id).await;
        }
        self.record_send(org_id, jitter, result)
    }

    fn record_send(
        &self,
        org_id: &str,
        jitter: Duration,
        result: Result<SentMessage, SendFailure>,
    ) -> SendOutcome {
        let outcome = match result {
            Ok(sent) => SendOutcome::sent(sent),
            Err(failure) => SendOutcome::failed(&failure),
        };
        TraceEvent::MessageDispatched {
            org_id: org_id.to_owned(),
            success: outcome.success,
            jitter_ms: jitter.as_millis() as u64,
            failure: outcome.error.clone(),
        }
        .emit();
        outcome
    }

    async fn evict_corrupted(&self, org_id: &str, session_id: Uuid) {
        let Some(_guard) = self.lock(org_id).await else {
            return;
        };
        tracing::warn!(org_id = %org_id, session_id = %session_id, "session corrupted, evicting");
        let Some(mut entry) = self.registry.remove_session(org_id, session_id) else {
            return;
        };
        entry.detach(true);
        entry.session.close().await;
        self.reconnect.reset(org_id);
        self.wipe(org_id, "session_corrupted").await;
        self.publish_disconnected(org_id, DisconnectReason::InvalidSession);
    }

    // ── helpers ────────────────────────────────────────────────────

    async fn wipe(&self, org_id: &str, reason: &str) -> bool {
        if let Err(e) = self.store.reset(org_id, None, reason).await {
            tracing::error!(org_id = %org_id, error = %e, reason, "failed to wipe auth state");
            return false;
        }
        self.persist_disconnected(org_id).await;
        true
    }

    async fn persist_disconnected(&self, org_id: &str) {
        if let Err(e) = self.store.mark_disconnected(org_id).await {
            tracing::error!(org_id = %org_id, error = %e, "failed to persist disconnected state");
        }
    }

    fn publish_disconnected(&self, org_id: &str, reason: DisconnectReason) {
        self.events.publish(BridgeEvent::Disconnected {
            org_id: org_id.to_owned(),
            reason,
        });
    }
}
