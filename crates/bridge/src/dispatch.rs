//! Outbound message dispatch.
//!
//! Normalizes the recipient address, waits a random human-like delay,
//! sends through the session and maps any failure to a [`SendFailure`].
//! Nothing here panics or returns an error past [`SendOutcome`].

use std::sync::OnceLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde::Serialize;

use ob_domain::config::{BridgeConfig, JitterConfig};

use crate::engine::{EngineError, ProtocolSession, SentMessage};

const MAX_DIAGNOSTIC_CHARS: usize = 200;

/// Uniform pre-send delay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterWindow {
    pub min: Duration,
    pub max: Duration,
}

impl Default for JitterWindow {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(2),
            max: Duration::from_secs(5),
        }
    }
}

impl From<&JitterConfig> for JitterWindow {
    fn from(cfg: &JitterConfig) -> Self {
        Self {
            min: Duration::from_millis(cfg.min_ms),
            max: Duration::from_millis(cfg.max_ms.max(cfg.min_ms)),
        }
    }
}

impl JitterWindow {
    /// No delay at all (tests, local tooling).
    pub const NONE: Self = Self {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = (self.max.as_millis() as u64).max(min);
        if min == max {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailureKind {
    NotConnected,
    SessionCorrupted,
    RateLimited,
    InvalidAddress,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    #[error("not connected")]
    NotConnected,
    #[error("session corrupted, reconnect required")]
    SessionCorrupted,
    #[error("rate limited, retry later")]
    RateLimited,
    #[error("invalid recipient address, check the number")]
    InvalidAddress,
    #[error("send failed: {0}")]
    Generic(String),
}

impl SendFailure {
    pub fn kind(&self) -> SendFailureKind {
        match self {
            Self::NotConnected => SendFailureKind::NotConnected,
            Self::SessionCorrupted => SendFailureKind::SessionCorrupted,
            Self::RateLimited => SendFailureKind::RateLimited,
            Self::InvalidAddress => SendFailureKind::InvalidAddress,
            Self::Generic(_) => SendFailureKind::Generic,
        }
    }

    /// Map an engine error onto a failure class.
    pub fn from_engine(err: &EngineError) -> Self {
        let (code, message) = match err {
            EngineError::Closed => return Self::NotConnected,
            EngineError::Rejected {
                status_code,
                message,
            } => (*status_code, message.clone()),
            other => (None, other.to_string()),
        };

        let p = patterns();
        if code == Some(429) || p.rate_limited.is_match(&message) {
            Self::RateLimited
        } else if p.corrupted.is_match(&message) {
            Self::SessionCorrupted
        } else if matches!(code, Some(400 | 404)) || p.invalid_address.is_match(&message) {
            Self::InvalidAddress
        } else {
            Self::Generic(truncate(&message, MAX_DIAGNOSTIC_CHARS))
        }
    }
}

/// Result of `send_message`, serialized as the HTTP response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<SendFailureKind>,
}

impl SendOutcome {
    pub fn sent(message: SentMessage) -> Self {
        Self {
            success: true,
            message_id: message.message_id,
            error: None,
            kind: None,
        }
    }

    pub fn failed(failure: &SendFailure) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(failure.to_string()),
            kind: Some(failure.kind()),
        }
    }
}

/// Turn user input into a network address.
///
/// Addresses that already carry a domain are kept as given.  Otherwise
/// `+`, whitespace, dashes and parentheses are stripped and `@suffix` is
/// appended.
pub fn normalize_address(raw: &str, suffix: &str) -> Result<String, SendFailure> {
    let trimmed = raw.trim();
    if let Some((local, domain)) = trimmed.split_once('@') {
        if local.is_empty() || domain.is_empty() {
            return Err(SendFailure::InvalidAddress);
        }
        return Ok(trimmed.to_owned());
    }

    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '+' | '-' | '(' | ')') && !c.is_whitespace())
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(SendFailure::InvalidAddress);
    }
    Ok(format!("{digits}@{suffix}"))
}

/// Per-send settings plus the send path itself.
#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    pub jitter: JitterWindow,
    pub address_suffix: String,
    pub send_timeout: Duration,
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl MessageDispatcher {
    pub fn from_config(cfg: &BridgeConfig) -> Self {
        Self {
            jitter: JitterWindow::from(&cfg.jitter),
            address_suffix: cfg.address_suffix.clone(),
            send_timeout: cfg.send_timeout(),
        }
    }

    /// Normalize, delay, send.  Returns the jitter applied with the result.
    pub async fn send(
        &self,
        org_id: &str,
        session: &dyn ProtocolSession,
        to: &str,
        text: &str,
    ) -> (Duration, Result<SentMessage, SendFailure>) {
        let address = match normalize_address(to, &self.address_suffix) {
            Ok(a) => a,
            Err(e) => return (Duration::ZERO, Err(e)),
        };

        let jitter = self.jitter.sample();
        tracing::debug!(org_id = %org_id, to = %address, jitter_ms = jitter.as_millis() as u64, "dispatching message");
        tokio::time::sleep(jitter).await;

        if session.is_closed() {
            return (jitter, Err(SendFailure::NotConnected));
        }

        let result = match tokio::time::timeout(self.send_timeout, session.send_text(&address, text)).await {
            Ok(Ok(sent)) => Ok(sent),
            Ok(Err(e)) => {
                tracing::warn!(org_id = %org_id, error = %e, "send failed");
                Err(SendFailure::from_engine(&e))
            }
            Err(_) => Err(SendFailure::from_engine(&EngineError::Timeout(self.send_timeout))),
        };
        (jitter, result)
    }
}

struct Patterns {
    rate_limited: Regex,
    corrupted: Regex,
    invalid_address: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        rate_limited: compile(r"(?i)rate[ _-]?limit|too many|overlimit"),
        corrupted: compile(r"(?i)bad mac|no (open )?sessions?|session (corrupt|invalid)|decrypt|invalid pre-?key"),
        invalid_address: compile(r"(?i)invalid (jid|address|number|recipient)|not registered|not on (the )?network|not.exists"),
    })
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static send-failure pattern")
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_owned(),
        None => s.to_owned(),
    }
}
