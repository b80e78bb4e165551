use std::sync::Arc;
use std::time::Instant;

use ob_bridge::ConnectionManager;
use ob_domain::config::Config;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Owns every organization's session.
    pub manager: Arc<ConnectionManager>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,

    pub started_at: Instant,
}
