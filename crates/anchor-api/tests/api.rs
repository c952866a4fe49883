//! API regression tests: routing, status mapping and body shapes.

use std::sync::Arc;

use anchor_api::build_router;
use anchor_client::{Method, ScriptedTransport};
use anchor_orchestrator::{Anchor, AnchorOptions};
use anchor_state::{NodeConfig, NodeStatus, StateStore};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

fn setup() -> (Router, Arc<Anchor>, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let state = StateStore::open_in_memory().unwrap();
    let anchor = Arc::new(Anchor::new(state, transport.clone(), AnchorOptions::default()));
    (build_router(Arc::clone(&anchor)), anchor, transport)
}

fn seed_node(anchor: &Anchor, id: &str, ip: &str) {
    anchor
        .state
        .add_node(id, ip, NodeStatus::Connected, NodeConfig::default(), Vec::new())
        .unwrap();
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn register_and_fetch_node() {
    let (router, _, _) = setup();

    let (status, body) = call(
        &router,
        "POST",
        "/api/v1/management/nodes/register",
        Some(json!({"ip": "10.0.0.1", "config": {"properties": [{"deviceid": "N1"}]}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"id": "N1"}));

    let (status, body) = call(&router, "GET", "/api/v1/management/nodes/N1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ip"], "10.0.0.1");
    assert_eq!(body["status"], "connected");

    let (status, body) = call(&router, "GET", "/api/v1/management/nodes?status=connected", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_node_is_404_with_message() {
    let (router, _, _) = setup();

    let (status, body) = call(&router, "GET", "/api/v1/management/nodes/ghost", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn malformed_body_is_400() {
    let (router, _, _) = setup();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/management/groups/create")
        .body(Body::from("not json"))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn group_deploy_answers_multi_status() {
    let (router, anchor, transport) = setup();
    transport
        .reply(Method::POST, "10.0.0.1", 200, r#"{"id":"A1","description":"d"}"#)
        .reply(Method::POST, "10.0.0.2", 500, r#"{"message":"boom"}"#);
    seed_node(&anchor, "N1", "10.0.0.1");
    seed_node(&anchor, "N2", "10.0.0.2");

    let (_, created) = call(
        &router,
        "POST",
        "/api/v1/management/groups/create",
        Some(json!({"name": "edge"})),
    )
    .await;
    let group_id = created["id"].as_str().unwrap().to_string();
    let (status, joined) = call(
        &router,
        "POST",
        &format!("/api/v1/management/groups/{group_id}/join"),
        Some(json!({"nodes": ["N1", "N2"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(joined["members"], json!(["N1", "N2"]));

    let (status, body) = call(
        &router,
        "POST",
        &format!("/api/v1/management/groups/{group_id}/apps/deploy"),
        Some(json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["id"], "A1");
    assert_eq!(body["responses"][1], json!({"id": "N2", "code": 500, "message": "boom"}));
}

#[tokio::test]
async fn node_app_verbs_route_to_agent() {
    let (router, anchor, transport) = setup();
    transport.reply(Method::POST, "/apps/A1/start", 200, "{}");
    seed_node(&anchor, "N1", "10.0.0.1");
    anchor.state.add_app("A1", "images: [redis]").unwrap();
    anchor.state.add_node_app("N1", "A1").unwrap();

    let (status, _) = call(&router, "POST", "/api/v1/management/nodes/N1/apps/A1/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(transport.calls_to(Method::POST, "/apps/A1/start").len(), 1);

    let (status, _) = call(&router, "POST", "/api/v1/management/nodes/N1/apps/A1/reboot", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn search_filters_by_query() {
    let (router, anchor, _) = setup();
    seed_node(&anchor, "N1", "10.0.0.1");
    seed_node(&anchor, "N2", "10.0.0.2");
    anchor.state.add_app("A1", "images: [redis]").unwrap();
    anchor.state.add_node_app("N2", "A1").unwrap();

    let (status, body) = call(&router, "GET", "/api/v1/search/nodes?imageName=redis", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], "N2");

    let (_, body) = call(&router, "GET", "/api/v1/search/apps?nodeId=N2", None).await;
    assert_eq!(body[0]["id"], "A1");

    let (status, _) = call(&router, "GET", "/api/v1/search/nodes?nodeId=ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn subscribe_list_and_unsubscribe() {
    let (router, anchor, transport) = setup();
    transport.reply_any("/watch", 200, "{}");
    seed_node(&anchor, "N1", "10.0.0.1");

    let (status, body) = call(
        &router,
        "POST",
        "/api/v1/notification/register?nodeId=N1",
        Some(json!({"url": "http://cb/", "event": {"type": "app", "status": ["started"]}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let subscriber_id = body["id"].as_str().unwrap().to_string();

    let (_, listed) = call(&router, "GET", "/api/v1/notification", None).await;
    assert_eq!(listed[0]["id"], subscriber_id.as_str());
    assert_eq!(listed[0]["type"], "app");

    let uri = format!("/api/v1/notification/{subscriber_id}");
    let (status, _) = call(&router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn inbound_events_by_source() {
    let (router, _, _) = setup();
    let event = json!({"eventid": ["e1"], "event": {"id": "A1", "status": "started"}});

    let (status, body) = call(&router, "POST", "/api/v1/notification/apps", Some(event.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"subscribers": 0}));

    let (status, _) = call(&router, "POST", "/api/v1/notification/clusters", Some(event)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &router,
        "POST",
        "/api/v1/notification/nodes",
        Some(json!({"eventid": ["e1"], "event": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
