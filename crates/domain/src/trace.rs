use serde::Serialize;

/// Structured trace events emitted across all orgbridge crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    AuthStateLoaded {
        org_id: String,
        created: bool,
        corrupted: bool,
        key_entries: usize,
    },
    AuthStateReset {
        org_id: String,
        reason: String,
    },
    CredentialsMerged {
        org_id: String,
        fields: usize,
    },
    SessionOpened {
        org_id: String,
        session_id: String,
        user_id: String,
    },
    SessionConnected {
        org_id: String,
        identifier: String,
    },
    SessionClosed {
        org_id: String,
        status_code: Option<u16>,
        classification: String,
    },
    ReconnectScheduled {
        org_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    ReconnectExhausted {
        org_id: String,
        attempts: u32,
    },
    MessageDispatched {
        org_id: String,
        success: bool,
        jitter_ms: u64,
        failure: Option<String>,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ob_event");
    }
}
