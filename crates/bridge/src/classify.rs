//! Close-signal classification.
//!
//! Status codes follow the network's conventions:
//!
//! | code | meaning                         |
//! |------|---------------------------------|
//! | 401  | unauthorized / logged out       |
//! | 403  | forbidden                       |
//! | 408  | timed out                       |
//! | 428  | connection closed / lost        |
//! | 440  | session replaced elsewhere      |
//! | 500  | bad session                     |
//! | 503  | service unavailable             |
//! | 515  | restart required                |
//!
//! A known code decides the class.  The message text only separates the
//! wiping outcomes of 401/403 and stands in when the code is absent or
//! unrecognised.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::events::DisconnectReason;

/// Why the network (or the transport) closed a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSignal {
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: String,
}

impl CloseSignal {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn classify(&self) -> CloseClass {
        let msg = self.message.as_str();
        match self.status_code {
            Some(440) => CloseClass::Conflict,
            Some(500) => CloseClass::InvalidSession,
            Some(408 | 428 | 503 | 515) => CloseClass::Temporary,
            // Both codes wipe; the text only picks which wipe.
            Some(401 | 403) => {
                let p = patterns();
                if p.logged_out.is_match(msg) {
                    CloseClass::LoggedOut
                } else {
                    CloseClass::CredentialRejected {
                        handshake: p.handshake.is_match(msg),
                    }
                }
            }
            code => classify_message(msg).unwrap_or(CloseClass::Unknown { status_code: code }),
        }
    }
}

/// Fallback for closes without a recognised status code.
fn classify_message(msg: &str) -> Option<CloseClass> {
    let p = patterns();
    let class = if p.conflict.is_match(msg) {
        CloseClass::Conflict
    } else if p.logged_out.is_match(msg) {
        CloseClass::LoggedOut
    } else if p.bad_session.is_match(msg) {
        CloseClass::InvalidSession
    } else if p.handshake.is_match(msg) {
        CloseClass::CredentialRejected { handshake: true }
    } else if p.unauthorized.is_match(msg) {
        CloseClass::CredentialRejected { handshake: false }
    } else if p.temporary.is_match(msg) {
        CloseClass::Temporary
    } else {
        return None;
    };
    Some(class)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    Temporary,
    CredentialRejected { handshake: bool },
    Conflict,
    LoggedOut,
    InvalidSession,
    Unknown { status_code: Option<u16> },
}

/// What the controller does about a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Keep credentials, retry through the reconnect policy.
    Reconnect,
    /// Wipe auth state, publish the reason, start a fresh pairing.
    RestartPairing(DisconnectReason),
    /// Stop.  `wipe` clears auth state; `reason` is published when present.
    Terminal {
        reason: Option<DisconnectReason>,
        wipe: bool,
    },
}

impl CloseClass {
    pub fn action(&self) -> CloseAction {
        match *self {
            Self::Temporary => CloseAction::Reconnect,
            Self::CredentialRejected { handshake: true } => {
                CloseAction::RestartPairing(DisconnectReason::HandshakeFailed)
            }
            Self::CredentialRejected { handshake: false } => {
                CloseAction::RestartPairing(DisconnectReason::CredentialRejected)
            }
            Self::Conflict => CloseAction::Terminal {
                reason: Some(DisconnectReason::ConflictReplaced),
                wipe: false,
            },
            Self::LoggedOut => CloseAction::Terminal {
                reason: Some(DisconnectReason::LoggedOut),
                wipe: true,
            },
            Self::InvalidSession => CloseAction::Terminal {
                reason: Some(DisconnectReason::InvalidSession),
                wipe: true,
            },
            Self::Unknown { status_code: Some(_) } => CloseAction::Reconnect,
            Self::Unknown { status_code: None } => CloseAction::Terminal {
                reason: None,
                wipe: false,
            },
        }
    }

    /// Short label for logs and trace events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::CredentialRejected { handshake: true } => "handshake_failed",
            Self::CredentialRejected { handshake: false } => "credential_rejected",
            Self::Conflict => "conflict",
            Self::LoggedOut => "logged_out",
            Self::InvalidSession => "invalid_session",
            Self::Unknown { status_code: Some(_) } => "unknown",
            Self::Unknown { status_code: None } => "local",
        }
    }
}

struct Patterns {
    conflict: Regex,
    logged_out: Regex,
    bad_session: Regex,
    handshake: Regex,
    unauthorized: Regex,
    temporary: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        conflict: compile(r"(?i)\b(conflict|replaced)\b"),
        logged_out: compile(r"(?i)logged[ _-]?out|\blogout\b"),
        bad_session: compile(r"(?i)bad[ _-]?session|invalid[ _-]?session"),
        handshake: compile(r"(?i)handshake|noise"),
        unauthorized: compile(r"(?i)unauthori[sz]ed|forbidden|connection failure"),
        temporary: compile(
            r"(?i)stream errored|restart required|connection (lost|closed)|timed out|unavailable",
        ),
    })
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static close pattern")
}
