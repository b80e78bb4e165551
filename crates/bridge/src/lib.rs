//! `ob-bridge` - per-organization session management for the messaging
//! bridge.
//!
//! # Architecture
//!
//! ```text
//!   HTTP / CLI
//!       │
//!       ▼
//! ┌──────────────────────┐   open / send / logout   ┌──────────────────┐
//! │  ConnectionManager   │ ───────────────────────▶ │  ProtocolEngine  │
//! │  (one per process)   │ ◀─────────────────────── │  (relay sidecar) │
//! └──────────────────────┘    SessionEvent stream   └──────────────────┘
//!   │        │        │
//!   │        │        └── EventBroadcaster  (org-{id} channels → UI)
//!   │        └─────────── ReconnectTracker + ReconnectTimers
//!   └──────────────────── AuthStateStore    (credentials + keys)
//! ```
//!
//! Every state transition for an organization runs under that
//! organization's lock ([`org_lock::OrgLocks`]); organizations never wait
//! on each other.

pub mod classify;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod manager;
pub mod org_lock;
pub mod qr;
pub mod reconnect;
pub mod registry;
pub mod timers;

pub use classify::{CloseAction, CloseClass, CloseSignal};
pub use dispatch::{JitterWindow, MessageDispatcher, SendFailure, SendFailureKind, SendOutcome};
pub use engine::relay::RelayEngine;
pub use engine::{EngineError, OpenedSession, ProtocolEngine, ProtocolSession, SentMessage, SessionEvent};
pub use events::{channel_name, BridgeEvent, DisconnectReason, EventBroadcaster};
pub use manager::{ConnectionInfo, ConnectionManager, ConnectionPhase, ManagerSettings, RestoreSummary, SYSTEM_USER};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectTracker};
pub use registry::{ConnectionRegistry, ConnectionSummary};
