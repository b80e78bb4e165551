//! Protocol engine seam.
//!
//! The bridge never speaks the messaging network's wire protocol itself.
//! A [`ProtocolEngine`] opens one device session per organization, seeded
//! with the stored credentials and key store, and reports everything that
//! happens on it as a stream of [`SessionEvent`]s.

pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use ob_auth_store::{CredentialPatch, Credentials, KeyStore};

pub use crate::classify::CloseSignal;

/// Something that happened on an open session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A pairing token to show the user as a QR code.
    Pairing { code: String },
    /// The session is authenticated and usable.
    Open { identifier: Option<String> },
    /// The session ended.  No further events follow.
    Close(CloseSignal),
    /// Partial credential update to merge into the stored credentials.
    CredentialsUpdate(CredentialPatch),
}

/// A freshly opened session plus its event stream.
pub struct OpenedSession {
    pub session: Arc<dyn ProtocolSession>,
    pub events: mpsc::Receiver<SessionEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("session closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The network refused the request.
    #[error("rejected{}: {message}", .status_code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Rejected {
        status_code: Option<u16>,
        message: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Open a session for `org_id`.  The engine persists key updates through
    /// `key_store`; credential updates come back as events.
    async fn open(
        &self,
        org_id: &str,
        credentials: Credentials,
        key_store: KeyStore,
    ) -> Result<OpenedSession, EngineError>;
}

#[async_trait]
pub trait ProtocolSession: Send + Sync {
    /// Whether the underlying transport is gone.
    fn is_closed(&self) -> bool;

    /// Linked account identifier, once known.
    fn identifier(&self) -> Option<String>;

    /// Send a text message to a normalized address.
    async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage, EngineError>;

    /// Unlink the device from the account.
    async fn logout(&self) -> Result<(), EngineError>;

    /// Close the transport.  Idempotent.
    async fn close(&self);
}
