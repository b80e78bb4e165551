//! `GET /v1/orgs/:org_id/events` - SSE stream of one organization's
//! lifecycle events (`pairing-code`, `connected`, `disconnected`).

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::Stream;
use tokio::sync::broadcast;

use ob_bridge::BridgeEvent;

use super::connections::validate_org_id;
use crate::state::AppState;

pub async fn org_events_sse(State(state): State<AppState>, Path(org_id): Path<String>) -> Response {
    if let Err(resp) = validate_org_id(&org_id) {
        return resp;
    }

    // Subscribe before reading the snapshot so nothing falls in between.
    let rx = state.manager.subscribe(&org_id);
    let pending_code = state.manager.registry().pairing_code(&org_id);
    tracing::debug!(org_id = %org_id, "event stream subscriber attached");

    let replay = pending_code.map(|qr| BridgeEvent::PairingCode {
        org_id: org_id.clone(),
        qr,
    });

    Sse::new(make_org_event_stream(replay, rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn to_sse(event: &BridgeEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.name()).data(data)
}

fn make_org_event_stream(
    replay: Option<BridgeEvent>,
    mut rx: broadcast::Receiver<BridgeEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        if let Some(event) = replay {
            yield Ok(to_sse(&event));
        }
        loop {
            match rx.recv().await {
                Ok(event) => yield Ok(to_sse(&event)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    let msg = format!("{{\"warning\":\"missed {n} events\"}}");
                    yield Ok(Event::default().event("warning").data(msg));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
