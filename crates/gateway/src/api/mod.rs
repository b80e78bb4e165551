pub mod auth;
pub mod connections;
pub mod cors;
pub mod events;
pub mod health;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the `OB_API_TOKEN` bearer-token middleware).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health::health));

    let protected = Router::new()
        // Connection lifecycle
        .route(
            "/v1/orgs/:org_id/connection",
            post(connections::initialize)
                .get(connections::get_info)
                .delete(connections::disconnect),
        )
        .route("/v1/orgs/:org_id/connection/status", get(connections::get_status))
        // Dispatch
        .route("/v1/orgs/:org_id/messages", post(connections::send_message))
        // Events (SSE)
        .route("/v1/orgs/:org_id/events", get(events::org_events_sse))
        // Teardown
        .route(
            "/v1/orgs/:org_id",
            axum::routing::delete(connections::cleanup_organization),
        )
        // Registry
        .route("/v1/connections", get(connections::list_connections))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}
