//! Bearer-token gate for the organization routes.
//!
//! The token comes from the env var named by `server.api_token_env` and is
//! hashed once in `bootstrap`.  With no token configured every request
//! passes.  Browser `EventSource` clients cannot set headers, so the token
//! is also accepted as a `token` query parameter.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_token_hash.as_deref() else {
        return next.run(req).await;
    };

    let presented = presented_token(req.headers(), req.uri()).unwrap_or_default();
    let digest = Sha256::digest(presented.as_bytes());

    if bool::from(digest.ct_eq(expected)) {
        return next.run(req).await;
    }

    tracing::debug!(path = %req.uri().path(), "rejected request without a valid API token");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
    )
        .into_response()
}

/// Token from `Authorization: Bearer ...`, falling back to `?token=...`.
fn presented_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_owned());
    if from_header.is_some() {
        return from_header;
    }

    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "token")
        .map(|(_, v)| v.to_owned())
}
