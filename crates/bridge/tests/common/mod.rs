//! In-process protocol engine driven by the test body.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use ob_auth_store::{AuthStateStore, Credentials, KeyStore, MemoryRepository};
use ob_bridge::{
    CloseSignal, ConnectionManager, EngineError, JitterWindow, ManagerSettings, MessageDispatcher,
    OpenedSession, ProtocolEngine, ProtocolSession, ReconnectPolicy, SentMessage, SessionEvent,
};

// ── session ──

#[derive(Default)]
pub struct ScriptedSession {
    closed: AtomicBool,
    identifier: Mutex<Option<String>>,
    pub sent: Mutex<Vec<(String, String)>>,
    send_failure: Mutex<Option<(Option<u16>, String)>>,
    pub logouts: AtomicUsize,
    pub closes: AtomicUsize,
    close_gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedSession {
    /// Make every following send fail with this rejection.
    pub fn fail_sends_with(&self, status_code: Option<u16>, message: &str) {
        *self.send_failure.lock() = Some((status_code, message.to_owned()));
    }

    /// Simulate the transport dying without any event.
    pub fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Make `close()` wait until `gate` is notified.
    pub fn hold_close_until(&self, gate: Arc<Notify>) {
        *self.close_gate.lock() = Some(gate);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ProtocolSession for ScriptedSession {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn identifier(&self) -> Option<String> {
        self.identifier.lock().clone()
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        if let Some((status_code, message)) = self.send_failure.lock().clone() {
            return Err(EngineError::Rejected {
                status_code,
                message,
            });
        }
        let mut sent = self.sent.lock();
        sent.push((to.to_owned(), text.to_owned()));
        Ok(SentMessage {
            message_id: Some(format!("msg-{}", sent.len())),
        })
    }

    async fn logout(&self) -> Result<(), EngineError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        let gate = self.close_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── engine ──

/// Everything the engine handed out for one `open` call.
#[derive(Clone)]
pub struct OpenCall {
    pub org_id: String,
    pub credentials: Credentials,
    pub key_store: KeyStore,
    pub events: mpsc::Sender<SessionEvent>,
    pub session: Arc<ScriptedSession>,
    pub at: tokio::time::Instant,
}

impl OpenCall {
    pub async fn emit(&self, event: SessionEvent) {
        self.events.send(event).await.expect("pump detached");
    }

    pub async fn open(&self, identifier: &str) {
        self.emit(SessionEvent::Open {
            identifier: Some(identifier.to_owned()),
        })
        .await;
    }

    pub async fn close(&self, status_code: Option<u16>, message: &str) {
        self.emit(SessionEvent::Close(CloseSignal::new(status_code, message)))
            .await;
    }
}

#[derive(Default)]
pub struct ScriptedEngine {
    calls: Mutex<Vec<OpenCall>>,
    failing_orgs: Mutex<HashSet<String>>,
}

impl ScriptedEngine {
    pub fn fail_org(&self, org_id: &str) {
        self.failing_orgs.lock().insert(org_id.to_owned());
    }

    pub fn heal_org(&self, org_id: &str) {
        self.failing_orgs.lock().remove(org_id);
    }

    pub fn opens(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn opens_for(&self, org_id: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.org_id == org_id).count()
    }

    pub fn last(&self, org_id: &str) -> OpenCall {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| c.org_id == org_id)
            .cloned()
            .expect("no session opened for org")
    }

    pub fn calls_for(&self, org_id: &str) -> Vec<OpenCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.org_id == org_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProtocolEngine for ScriptedEngine {
    async fn open(
        &self,
        org_id: &str,
        credentials: Credentials,
        key_store: KeyStore,
    ) -> Result<OpenedSession, EngineError> {
        if self.failing_orgs.lock().contains(org_id) {
            return Err(EngineError::Connect("scripted failure".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(ScriptedSession::default());
        self.calls.lock().push(OpenCall {
            org_id: org_id.to_owned(),
            credentials,
            key_store,
            events: tx,
            session: session.clone(),
            at: tokio::time::Instant::now(),
        });
        Ok(OpenedSession {
            session,
            events: rx,
        })
    }
}

// ── harness ──

pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub store: Arc<AuthStateStore>,
    pub engine: Arc<ScriptedEngine>,
    pub manager: Arc<ConnectionManager>,
}

pub fn settings(jitter: JitterWindow) -> ManagerSettings {
    ManagerSettings {
        reconnect: ReconnectPolicy::default(),
        pairing_restart_delay: Duration::from_secs(1),
        dispatcher: MessageDispatcher {
            jitter,
            address_suffix: "s.whatsapp.net".into(),
            send_timeout: Duration::from_secs(30),
        },
    }
}

pub fn harness() -> Harness {
    harness_with(settings(JitterWindow::NONE))
}

pub fn harness_with(settings: ManagerSettings) -> Harness {
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(AuthStateStore::with_generated_credentials(repo.clone()));
    let engine = Arc::new(ScriptedEngine::default());
    let manager = ConnectionManager::new(store.clone(), engine.clone(), settings);
    Harness {
        repo,
        store,
        engine,
        manager,
    }
}

/// Poll `cond` in 10ms steps of (virtual) time, up to `max`.
pub async fn wait_until(max: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    loop {
        tokio::task::yield_now().await;
        if cond() {
            return true;
        }
        if waited >= max {
            return false;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
}

/// Persisted credentials JSON, exactly as stored.
pub fn stored_credentials(repo: &MemoryRepository, org_id: &str) -> Option<String> {
    repo.fetch_now(org_id).and_then(|r| r.auth_credentials)
}
