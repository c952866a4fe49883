//! Notification API handlers: subscriber registry and inbound agent events.

use anchor_state::EventKind;
use axum::Json;
use axum::extract::{Path, RawQuery, State};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use anchor_orchestrator::AnchorError;

use crate::ApiState;
use crate::handlers::{error_response, query_map, respond};

/// GET /api/v1/notification
pub async fn list_subscribers(State(state): State<ApiState>) -> Response {
    match state.anchor.notification.list_subscribers() {
        Ok(subscribers) => Json(subscribers).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/notification/register
pub async fn register(
    State(state): State<ApiState>,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> Response {
    respond(state.anchor.notification.register(&query_map(raw), &body).await)
}

/// DELETE /api/v1/notification/{id}
pub async fn unregister(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.anchor.notification.unregister(&id).await)
}

/// POST /api/v1/notification/{apps|nodes}
///
/// Agents push lifecycle events here; they are relayed to matching subscribers.
pub async fn inbound_event(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Response {
    let kind = match kind.as_str() {
        "apps" => EventKind::App,
        "nodes" => EventKind::Node,
        other => {
            return error_response(&AnchorError::NotFound(format!("event source '{other}'")));
        }
    };
    respond(state.anchor.notification.notify(kind, &body))
}
