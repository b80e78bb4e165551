//! WebSocket relay engine.
//!
//! Speaks JSON to an external protocol sidecar, one WebSocket per
//! organization session:
//!
//! ```text
//! bridge ──hello{org_id, credentials, keys}──▶ relay
//! bridge ◀──qr / open / close / creds_update / keys_set / send_result── relay
//! bridge ──send_text{request_id, to, text} / logout──▶ relay
//! ```
//!
//! `keys_set` updates are written straight into the organization's key
//! store; everything else becomes a [`SessionEvent`].  A transport drop
//! without a `close` frame is reported as status 428.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use ob_auth_store::{decode_key_updates, AuthValue, CredentialPatch, Credentials, KeyStore};

use super::{
    CloseSignal, EngineError, OpenedSession, ProtocolEngine, ProtocolSession, SentMessage,
    SessionEvent,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const EVENT_BUFFER: usize = 64;
const OUTBOUND_BUFFER: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayOutbound {
    Hello {
        org_id: String,
        credentials: Value,
        keys: Value,
    },
    SendText {
        request_id: String,
        to: String,
        text: String,
    },
    Logout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayInbound {
    Qr {
        code: String,
    },
    Open {
        identifier: Option<String>,
    },
    Close {
        status_code: Option<u16>,
        #[serde(default)]
        message: String,
    },
    CredsUpdate {
        patch: Value,
    },
    KeysSet {
        updates: Value,
    },
    SendResult {
        request_id: String,
        ok: bool,
        message_id: Option<String>,
        status_code: Option<u16>,
        error: Option<String>,
    },
}

#[derive(Debug)]
struct SendResult {
    ok: bool,
    message_id: Option<String>,
    status_code: Option<u16>,
    error: Option<String>,
}

enum WriterCmd {
    Send(RelayOutbound),
    Close,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RelayEngine {
    url: String,
    send_timeout: Duration,
}

impl RelayEngine {
    pub fn new(url: impl Into<String>, send_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            send_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ProtocolEngine for RelayEngine {
    async fn open(
        &self,
        org_id: &str,
        credentials: Credentials,
        key_store: KeyStore,
    ) -> Result<OpenedSession, EngineError> {
        tracing::info!(url = %self.url, org_id = %org_id, "connecting to relay");

        let (ws, _response) = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(self.url.as_str()))
            .await
            .map_err(|_| EngineError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        let (mut sink, stream) = ws.split();

        // ── hello ──
        let keys = serde_json::to_value(key_store.snapshot().await)
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        let hello = RelayOutbound::Hello {
            org_id: org_id.to_owned(),
            credentials: credentials.to_json(),
            keys,
        };
        let json = serde_json::to_string(&hello).map_err(|e| EngineError::Protocol(e.to_string()))?;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;

        let shared = Arc::new(Shared::default());
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WriterCmd>(OUTBOUND_BUFFER);

        // Writer task: serializes outbound commands onto the socket.
        let writer_org = org_id.to_owned();
        let writer = tokio::spawn(async move {
            while let Some(cmd) = outbound_rx.recv().await {
                match cmd {
                    WriterCmd::Send(msg) => {
                        let json = match serde_json::to_string(&msg) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!(org_id = %writer_org, error = %e, "failed to serialize relay message");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    WriterCmd::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let reader = tokio::spawn(read_loop(
            org_id.to_owned(),
            stream,
            shared.clone(),
            event_tx,
            key_store,
        ));

        let session = RelaySession {
            org_id: org_id.to_owned(),
            shared,
            outbound: outbound_tx,
            send_timeout: self.send_timeout,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        };

        Ok(OpenedSession {
            session: Arc::new(session),
            events: event_rx,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Shared {
    closed: AtomicBool,
    identifier: RwLock<Option<String>>,
    pending: Mutex<HashMap<String, oneshot::Sender<SendResult>>>,
}

impl Shared {
    /// Mark closed and drop every waiting sender so callers see `Closed`.
    fn shut(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending.lock().clear();
    }
}

pub struct RelaySession {
    org_id: String,
    shared: Arc<Shared>,
    outbound: mpsc::Sender<WriterCmd>,
    send_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl ProtocolSession for RelaySession {
    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn identifier(&self) -> Option<String> {
        self.shared.identifier.read().clone()
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(request_id.clone(), tx);

        let msg = RelayOutbound::SendText {
            request_id: request_id.clone(),
            to: to.to_owned(),
            text: text.to_owned(),
        };
        if self.outbound.send(WriterCmd::Send(msg)).await.is_err() {
            self.shared.pending.lock().remove(&request_id);
            return Err(EngineError::Closed);
        }

        match tokio::time::timeout(self.send_timeout, rx).await {
            Ok(Ok(result)) if result.ok => Ok(SentMessage {
                message_id: result.message_id,
            }),
            Ok(Ok(result)) => Err(EngineError::Rejected {
                status_code: result.status_code,
                message: result.error.unwrap_or_else(|| "send rejected".into()),
            }),
            Ok(Err(_)) => Err(EngineError::Closed),
            Err(_) => {
                self.shared.pending.lock().remove(&request_id);
                Err(EngineError::Timeout(self.send_timeout))
            }
        }
    }

    async fn logout(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        self.outbound
            .send(WriterCmd::Send(RelayOutbound::Logout))
            .await
            .map_err(|_| EngineError::Closed)
    }

    async fn close(&self) {
        self.shared.shut();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        // Let the writer flush a close frame; abort it if it cannot take one.
        if self.outbound.try_send(WriterCmd::Close).is_err() {
            if let Some(writer) = self.writer.lock().take() {
                writer.abort();
            }
        }
        tracing::debug!(org_id = %self.org_id, "relay session closed");
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        self.shared.shut();
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reader
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_loop<S>(
    org_id: String,
    mut stream: S,
    shared: Arc<Shared>,
    events: mpsc::Sender<SessionEvent>,
    key_store: KeyStore,
) where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let signal = loop {
        let text = match stream.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(org_id = %org_id, frame = ?frame, "relay closed connection");
                break CloseSignal::new(Some(428), "connection lost");
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(org_id = %org_id, error = %e, "relay transport error");
                break CloseSignal::new(Some(428), "connection lost");
            }
            None => break CloseSignal::new(Some(428), "connection lost"),
        };

        let inbound = match serde_json::from_str::<RelayInbound>(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(org_id = %org_id, error = %e, "ignoring unparseable relay message");
                continue;
            }
        };

        let event = match inbound {
            RelayInbound::Qr { code } => SessionEvent::Pairing { code },
            RelayInbound::Open { identifier } => {
                if identifier.is_some() {
                    *shared.identifier.write() = identifier.clone();
                }
                SessionEvent::Open { identifier }
            }
            RelayInbound::Close {
                status_code,
                message,
            } => break CloseSignal::new(status_code, message),
            RelayInbound::CredsUpdate { patch } => match decode_patch(patch) {
                Some(patch) => SessionEvent::CredentialsUpdate(patch),
                None => {
                    tracing::warn!(org_id = %org_id, "dropping malformed creds_update");
                    continue;
                }
            },
            RelayInbound::KeysSet { updates } => {
                match decode_key_updates(updates) {
                    Ok(updates) => {
                        if let Err(e) = key_store.set(updates).await {
                            tracing::error!(org_id = %org_id, error = %e, "failed to persist key updates");
                        }
                    }
                    Err(e) => tracing::warn!(org_id = %org_id, error = %e, "dropping malformed keys_set"),
                }
                continue;
            }
            RelayInbound::SendResult {
                request_id,
                ok,
                message_id,
                status_code,
                error,
            } => {
                match shared.pending.lock().remove(&request_id) {
                    Some(tx) => {
                        let _ = tx.send(SendResult {
                            ok,
                            message_id,
                            status_code,
                            error,
                        });
                    }
                    None => tracing::debug!(org_id = %org_id, request_id = %request_id, "send_result for unknown request"),
                }
                continue;
            }
        };

        if events.send(event).await.is_err() {
            // Receiver detached; nobody is listening any more.
            shared.shut();
            return;
        }
    };

    shared.shut();
    let _ = events.send(SessionEvent::Close(signal)).await;
}

fn decode_patch(value: Value) -> Option<CredentialPatch> {
    match AuthValue::from_json(value).ok()? {
        AuthValue::Object(fields) => Some(fields),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_wire_shape() {
        let msg = RelayOutbound::SendText {
            request_id: "r1".into(),
            to: "15550001111@s.whatsapp.net".into(),
            text: "hi".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "send_text");
        assert_eq!(json["request_id"], "r1");

        let logout = serde_json::to_value(&RelayOutbound::Logout).unwrap();
        assert_eq!(logout, serde_json::json!({"type": "logout"}));
    }

    #[test]
    fn inbound_close_without_code() {
        let msg: RelayInbound = serde_json::from_str(r#"{"type":"close"}"#).unwrap();
        assert_eq!(
            msg,
            RelayInbound::Close {
                status_code: None,
                message: String::new()
            }
        );
    }

    #[test]
    fn patch_must_be_an_object() {
        let patch = decode_patch(serde_json::json!({
            "me": {"id": "15550001111@s.whatsapp.net"},
            "advSecretKey": {"type": "Buffer", "data": "AAEC"}
        }))
        .unwrap();
        assert_eq!(patch["advSecretKey"].as_bytes(), Some(&[0u8, 1, 2][..]));
        assert!(decode_patch(serde_json::json!("nope")).is_none());
    }
}
