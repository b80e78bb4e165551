//! Per-organization connection endpoints.
//!
//! - `POST   /v1/orgs/:org_id/connection`        - start (or join) pairing / resume
//! - `DELETE /v1/orgs/:org_id/connection`        - log out and wipe auth state
//! - `GET    /v1/orgs/:org_id/connection`        - lifecycle snapshot
//! - `GET    /v1/orgs/:org_id/connection/status` - `{connected}`
//! - `POST   /v1/orgs/:org_id/messages`          - send a text message
//! - `DELETE /v1/orgs/:org_id`                   - organization teardown
//! - `GET    /v1/connections`                    - live registry entries

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use ob_bridge::{SendFailureKind, SendOutcome};

use crate::state::AppState;

const MAX_ORG_ID_LEN: usize = 128;

/// Reject org ids that could not have come from the host application.
pub(crate) fn validate_org_id(org_id: &str) -> Result<(), Response> {
    let ok = !org_id.is_empty()
        && org_id.len() <= MAX_ORG_ID_LEN
        && org_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(error(StatusCode::BAD_REQUEST, "invalid organization id"))
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/orgs/:org_id/connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub user_id: String,
}

pub async fn initialize(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Json(body): Json<InitializeRequest>,
) -> Response {
    if let Err(resp) = validate_org_id(&org_id) {
        return resp;
    }
    if body.user_id.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "user_id must not be empty");
    }

    if state.manager.initialize_connection(&org_id, &body.user_id).await {
        Json(serde_json::json!({ "success": true, "org_id": org_id })).into_response()
    } else {
        error(StatusCode::BAD_GATEWAY, "failed to open protocol session")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/orgs/:org_id/connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn disconnect(State(state): State<AppState>, Path(org_id): Path<String>) -> Response {
    if let Err(resp) = validate_org_id(&org_id) {
        return resp;
    }
    if state.manager.disconnect(&org_id).await {
        Json(serde_json::json!({ "success": true })).into_response()
    } else {
        error(StatusCode::INTERNAL_SERVER_ERROR, "failed to reset auth state")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/orgs/:org_id/connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_info(State(state): State<AppState>, Path(org_id): Path<String>) -> Response {
    if let Err(resp) = validate_org_id(&org_id) {
        return resp;
    }
    Json(state.manager.get_connection_info(&org_id).await).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/orgs/:org_id/connection/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_status(State(state): State<AppState>, Path(org_id): Path<String>) -> Response {
    if let Err(resp) = validate_org_id(&org_id) {
        return resp;
    }
    let connected = state.manager.is_connected(&org_id).await;
    Json(serde_json::json!({ "connected": connected })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/orgs/:org_id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub text: String,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    if let Err(resp) = validate_org_id(&org_id) {
        return resp;
    }
    if body.to.trim().is_empty() || body.text.is_empty() {
        return error(StatusCode::BAD_REQUEST, "to and text are required");
    }

    let outcome = state.manager.send_message(&org_id, &body.to, &body.text).await;
    (send_status(&outcome), Json(outcome)).into_response()
}

fn send_status(outcome: &SendOutcome) -> StatusCode {
    match outcome.kind {
        None => StatusCode::OK,
        Some(SendFailureKind::NotConnected) => StatusCode::CONFLICT,
        Some(SendFailureKind::InvalidAddress) => StatusCode::BAD_REQUEST,
        Some(SendFailureKind::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        Some(SendFailureKind::SessionCorrupted) => StatusCode::SERVICE_UNAVAILABLE,
        Some(SendFailureKind::Generic) => StatusCode::BAD_GATEWAY,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/orgs/:org_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cleanup_organization(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Response {
    if let Err(resp) = validate_org_id(&org_id) {
        return resp;
    }
    if state.manager.cleanup_organization(&org_id).await {
        Json(serde_json::json!({ "success": true })).into_response()
    } else {
        error(StatusCode::INTERNAL_SERVER_ERROR, "organization cleanup incomplete")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/connections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_connections(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.manager.registry().list();
    Json(serde_json::json!({
        "count": connections.len(),
        "connections": connections,
    }))
}
