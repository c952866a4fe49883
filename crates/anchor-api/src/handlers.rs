//! REST API handlers for management and search.
//!
//! Controllers answer an [`Outcome`] (three-valued status plus JSON body) or
//! an [`AnchorError`]; handlers only render them.

use anchor_orchestrator::{AnchorError, AnchorResult, Outcome, QueryFilter};
use anchor_state::QueryMap;
use axum::Json;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::ApiState;

/// Render a controller outcome with its aggregate status code.
pub(crate) fn outcome_response(outcome: Outcome) -> Response {
    let status = StatusCode::from_u16(outcome.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome.body)).into_response()
}

pub(crate) fn error_response(err: &AnchorError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    } else {
        debug!(error = %err, "request rejected");
    }
    (status, Json(json!({ "message": err.to_string() }))).into_response()
}

pub(crate) fn respond(result: AnchorResult<Outcome>) -> Response {
    match result {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => error_response(&e),
    }
}

fn json_or_error<T: Serialize>(result: AnchorResult<T>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Parse a raw query string into the repeated-key multimap controllers take.
pub(crate) fn query_map(raw: Option<String>) -> QueryMap {
    let mut query = QueryMap::new();
    if let Some(raw) = raw {
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            query.entry(key.into_owned()).or_default().push(value.into_owned());
        }
    }
    query
}

fn unknown_action(action: &str) -> Response {
    error_response(&AnchorError::InvalidParam(format!(
        "unknown app action '{action}', expected start, stop or update"
    )))
}

// ── Nodes ──────────────────────────────────────────────────────

/// GET /api/v1/management/nodes
pub async fn list_nodes(State(state): State<ApiState>, RawQuery(raw): RawQuery) -> Response {
    json_or_error(state.anchor.nodes.list(&query_map(raw)))
}

/// POST /api/v1/management/nodes/register
pub async fn register_node(State(state): State<ApiState>, body: Bytes) -> Response {
    respond(state.anchor.nodes.register(&body).await)
}

/// GET /api/v1/management/nodes/{id}
pub async fn get_node(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    json_or_error(state.anchor.nodes.get(&id))
}

/// POST /api/v1/management/nodes/{id}/unregister
pub async fn unregister_node(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.anchor.nodes.unregister(&id).await)
}

/// POST /api/v1/management/nodes/{id}/ping
pub async fn ping_node(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    respond(state.anchor.nodes.ping(&id, &body).await)
}

/// GET /api/v1/management/nodes/{id}/configuration
pub async fn get_node_configuration(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    json_or_error(state.anchor.nodes.configuration(&id))
}

/// POST /api/v1/management/nodes/{id}/configuration
pub async fn set_node_configuration(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    respond(state.anchor.nodes.set_configuration(&id, &body))
}

// ── Node apps ──────────────────────────────────────────────────

/// GET /api/v1/management/nodes/{id}/apps
pub async fn node_apps(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.anchor.node_apps.get_apps(&id).await)
}

/// POST /api/v1/management/nodes/{id}/apps/deploy
pub async fn node_deploy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> Response {
    respond(state.anchor.node_apps.deploy(&id, &query_map(raw), &body).await)
}

/// GET /api/v1/management/nodes/{id}/apps/{app}
pub async fn node_app(
    State(state): State<ApiState>,
    Path((id, app)): Path<(String, String)>,
) -> Response {
    respond(state.anchor.node_apps.get_app(&id, &app).await)
}

/// POST /api/v1/management/nodes/{id}/apps/{app}
pub async fn node_update_info(
    State(state): State<ApiState>,
    Path((id, app)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    respond(state.anchor.node_apps.update_info(&id, &app, &body).await)
}

/// DELETE /api/v1/management/nodes/{id}/apps/{app}
pub async fn node_delete_app(
    State(state): State<ApiState>,
    Path((id, app)): Path<(String, String)>,
) -> Response {
    respond(state.anchor.node_apps.delete(&id, &app).await)
}

/// POST /api/v1/management/nodes/{id}/apps/{app}/{action}
pub async fn node_app_action(
    State(state): State<ApiState>,
    Path((id, app, action)): Path<(String, String, String)>,
    body: Bytes,
) -> Response {
    let apps = &state.anchor.node_apps;
    match action.as_str() {
        "start" => respond(apps.start(&id, &app).await),
        "stop" => respond(apps.stop(&id, &app).await),
        "update" => respond(apps.update(&id, &app, &body).await),
        other => unknown_action(other),
    }
}

// ── Groups ─────────────────────────────────────────────────────

/// GET /api/v1/management/groups
pub async fn list_groups(State(state): State<ApiState>) -> Response {
    json_or_error(state.anchor.groups.list())
}

/// POST /api/v1/management/groups/create
pub async fn create_group(State(state): State<ApiState>, body: Bytes) -> Response {
    respond(state.anchor.groups.create(&body))
}

/// GET /api/v1/management/groups/{id}
pub async fn get_group(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    json_or_error(state.anchor.groups.get(&id))
}

/// DELETE /api/v1/management/groups/{id}
pub async fn delete_group(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.anchor.groups.delete(&id))
}

/// POST /api/v1/management/groups/{id}/join
pub async fn join_group(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    respond(state.anchor.groups.join(&id, &body))
}

/// POST /api/v1/management/groups/{id}/leave
pub async fn leave_group(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    respond(state.anchor.groups.leave(&id, &body))
}

// ── Group apps ─────────────────────────────────────────────────

/// GET /api/v1/management/groups/{id}/apps
pub async fn group_apps(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.anchor.group_apps.get_apps(&id).await)
}

/// POST /api/v1/management/groups/{id}/apps/deploy
pub async fn group_deploy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    respond(state.anchor.group_apps.deploy(&id, &body).await)
}

/// GET /api/v1/management/groups/{id}/apps/{app}
pub async fn group_app(
    State(state): State<ApiState>,
    Path((id, app)): Path<(String, String)>,
) -> Response {
    respond(state.anchor.group_apps.get_app(&id, &app).await)
}

/// POST /api/v1/management/groups/{id}/apps/{app}
pub async fn group_update_info(
    State(state): State<ApiState>,
    Path((id, app)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    respond(state.anchor.group_apps.update_info(&id, &app, &body).await)
}

/// DELETE /api/v1/management/groups/{id}/apps/{app}
pub async fn group_delete_app(
    State(state): State<ApiState>,
    Path((id, app)): Path<(String, String)>,
) -> Response {
    respond(state.anchor.group_apps.delete(&id, &app).await)
}

/// POST /api/v1/management/groups/{id}/apps/{app}/{action}
pub async fn group_app_action(
    State(state): State<ApiState>,
    Path((id, app, action)): Path<(String, String, String)>,
    body: Bytes,
) -> Response {
    let apps = &state.anchor.group_apps;
    match action.as_str() {
        "start" => respond(apps.start(&id, &app).await),
        "stop" => respond(apps.stop(&id, &app).await),
        "update" => respond(apps.update(&id, &app, &body).await),
        other => unknown_action(other),
    }
}

// ── Apps ───────────────────────────────────────────────────────

/// GET /api/v1/management/apps
pub async fn list_apps(State(state): State<ApiState>) -> Response {
    json_or_error(state.anchor.apps.list())
}

/// GET /api/v1/management/apps/{id}
pub async fn get_app(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    json_or_error(state.anchor.apps.get(&id))
}

// ── Search ─────────────────────────────────────────────────────

/// GET /api/v1/search/nodes
pub async fn search_nodes(State(state): State<ApiState>, RawQuery(raw): RawQuery) -> Response {
    let filter = QueryFilter::from_query(&query_map(raw));
    json_or_error(state.anchor.search.nodes(&filter))
}

/// GET /api/v1/search/apps
pub async fn search_apps(State(state): State<ApiState>, RawQuery(raw): RawQuery) -> Response {
    let filter = QueryFilter::from_query(&query_map(raw));
    json_or_error(state.anchor.search.apps(&filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_map_keeps_repeated_keys() {
        let query = query_map(Some("groupId=G1&status=connected&groupId=G2&event=http%3A%2F%2Fcb%2F".into()));

        assert_eq!(query["groupId"], vec!["G1", "G2"]);
        assert_eq!(query["status"], vec!["connected"]);
        assert_eq!(query["event"], vec!["http://cb/"]);
        assert!(query_map(None).is_empty());
    }

    #[test]
    fn errors_render_with_their_status() {
        let response = error_response(&AnchorError::NotFound("node N9".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = error_response(&AnchorError::InvalidJson("bad".into()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn outcomes_render_with_aggregate_status() {
        let response = outcome_response(Outcome::new(
            anchor_orchestrator::Status::MultiStatus,
            json!({"responses": []}),
        ));
        assert_eq!(response.status(), StatusCode::MULTI_STATUS);

        let response = outcome_response(Outcome::error("agent unreachable"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
