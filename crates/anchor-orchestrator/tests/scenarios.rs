//! End-to-end control plane scenarios against a scripted agent fleet.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anchor_client::{Method, QueryParams, Reply, ScriptedTransport, Transport};
use anchor_orchestrator::filter::{self, QueryFilter};
use anchor_orchestrator::{Anchor, AnchorOptions, Status};
use anchor_state::{NodeConfig, NodeStatus, QueryMap, StateStore};
use async_trait::async_trait;
use serde_json::json;

fn anchor_with(transport: Arc<dyn Transport>) -> Anchor {
    let state = StateStore::open_in_memory().unwrap();
    Anchor::new(state, transport, AnchorOptions::default())
}

fn seed_node(anchor: &Anchor, id: &str, ip: &str) {
    anchor
        .state
        .add_node(id, ip, NodeStatus::Connected, NodeConfig::default(), Vec::new())
        .unwrap();
}

fn group_query(group_id: &str) -> QueryMap {
    let mut query = QueryMap::new();
    query.insert(filter::GROUP_ID.to_string(), vec![group_id.to_string()]);
    query
}

fn subscription(url: &str, kind: &str, status: &[&str]) -> Vec<u8> {
    json!({"url": url, "event": {"type": kind, "status": status}})
        .to_string()
        .into_bytes()
}

/// Let spawned background work run to completion.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn register_then_deploy_single_node() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.reply(
        Method::POST,
        "/apps/deploy",
        200,
        r#"{"id":"A1","description":"images:\n  - redis\n"}"#,
    );
    let anchor = anchor_with(transport.clone());

    let registered = anchor
        .nodes
        .register(br#"{"ip":"10.0.0.1","config":{"properties":[{"deviceid":"N1"}]}}"#)
        .await
        .unwrap();
    assert_eq!(registered.body, json!({"id": "N1"}));

    let deployed = anchor
        .node_apps
        .deploy("N1", &QueryMap::new(), br#"{"images":["redis"]}"#)
        .await
        .unwrap();

    assert_eq!(deployed.status, Status::Ok);
    assert_eq!(deployed.body, json!({"id": "A1"}));
    assert_eq!(anchor.state.get_node("N1").unwrap().apps, vec!["A1"]);
    assert!(anchor.state.get_app("A1").is_ok());
    assert_eq!(anchor.search.apps(&QueryFilter::node("N1")).unwrap().len(), 1);
}

#[tokio::test]
async fn group_deploy_partial_success() {
    let transport = Arc::new(ScriptedTransport::new());
    transport
        .reply(Method::POST, "10.0.0.1", 200, r#"{"id":"A1","description":"d"}"#)
        .reply(Method::POST, "10.0.0.2", 500, r#"{"message":"boom"}"#);
    let anchor = anchor_with(transport.clone());
    seed_node(&anchor, "N1", "10.0.0.1");
    seed_node(&anchor, "N2", "10.0.0.2");
    let group = anchor.state.create_group("G").unwrap();
    anchor.state.add_group_member(&group.id, "N1").unwrap();
    anchor.state.add_group_member(&group.id, "N2").unwrap();

    let outcome = anchor.group_apps.deploy(&group.id, b"{}").await.unwrap();

    assert_eq!(outcome.status, Status::MultiStatus);
    assert_eq!(outcome.code(), 207);
    assert_eq!(
        outcome.body,
        json!({
            "id": "A1",
            "responses": [
                {"id": "N1", "code": 200},
                {"id": "N2", "code": 500, "message": "boom"},
            ]
        })
    );
    assert!(anchor.state.get_node("N1").unwrap().holds_app("A1"));
    assert!(!anchor.state.get_node("N2").unwrap().holds_app("A1"));
    assert!(anchor.state.get_app("A1").is_ok());
}

#[tokio::test(start_paused = true)]
async fn liveness_transition_and_recovery() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.reply_any("http://cb/", 200, "");
    let anchor = anchor_with(transport.clone());
    seed_node(&anchor, "N1", "10.0.0.1");
    anchor
        .notification
        .register(
            &QueryFilter::node("N1").to_query(),
            &subscription("http://cb/", "node", &["connected", "disconnected"]),
        )
        .await
        .unwrap();

    anchor.nodes.ping("N1", br#"{"interval":"1"}"#).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2 * 60 + 1)).await;
    settle().await;
    assert_eq!(anchor.state.get_node("N1").unwrap().status, NodeStatus::Disconnected);

    let outcome = anchor.nodes.ping("N1", br#"{"interval":"5"}"#).await.unwrap();
    settle().await;
    assert_eq!(outcome.body["reconnected"], true);
    assert_eq!(anchor.state.get_node("N1").unwrap().status, NodeStatus::Connected);
    assert!(anchor.liveness.is_armed("N1").await);

    let delivered: Vec<String> = transport
        .calls_to(Method::POST, "http://cb/")
        .iter()
        .map(|c| c.json().unwrap()["event"]["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(delivered, vec!["disconnected", "connected"]);

    anchor.shutdown().await;
    assert!(anchor.liveness.armed_nodes().await.is_empty());
}

#[tokio::test]
async fn membership_change_extends_watches() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.reply_any("/watch", 200, "{}");
    let anchor = anchor_with(transport.clone());
    seed_node(&anchor, "N1", "10.0.0.1");
    seed_node(&anchor, "N2", "10.0.0.2");
    let group = anchor.state.create_group("G").unwrap();
    anchor.state.add_group_member(&group.id, "N1").unwrap();

    anchor
        .notification
        .register(
            &group_query(&group.id),
            &subscription("http://cb/", "app", &["started"]),
        )
        .await
        .unwrap();
    let event_id = filter::sha1_hex(&[&group.id, "ALL", "ALL", "ALL"]);
    assert_eq!(anchor.state.get_app_event(&event_id).unwrap().nodes, vec!["N1"]);

    anchor.state.add_group_member(&group.id, "N2").unwrap();
    transport.clear_calls();
    anchor.notification.reconcile_subscribers().await.unwrap();

    let posts = transport.calls_to(Method::POST, "/watch");
    assert_eq!(posts.len(), 1);
    assert!(posts[0].url.starts_with("http://10.0.0.2:48098/"));
    assert_eq!(posts[0].json().unwrap(), json!({"eventid": event_id}));
    assert_eq!(
        anchor.state.get_app_event(&event_id).unwrap().nodes,
        vec!["N1", "N2"]
    );
}

#[tokio::test]
async fn last_unsubscribe_unwatches_everything() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.reply_any("/watch", 200, "{}");
    let anchor = anchor_with(transport.clone());
    seed_node(&anchor, "N1", "10.0.0.1");
    seed_node(&anchor, "N2", "10.0.0.2");

    let outcome = anchor
        .notification
        .register(&QueryMap::new(), &subscription("http://cb/", "app", &["started"]))
        .await
        .unwrap();
    let subscriber_id = outcome.body["id"].as_str().unwrap().to_string();
    let event_id = QueryFilter::default().event_id();
    transport.clear_calls();

    anchor.notification.unregister(&subscriber_id).await.unwrap();

    let deletes = transport.calls_to(Method::DELETE, "/watch");
    assert_eq!(deletes.len(), 2);
    for call in &deletes {
        assert_eq!(call.json().unwrap()["eventid"], event_id.as_str());
    }
    assert!(anchor.state.find_app_event(&event_id).unwrap().is_none());
    assert!(anchor.state.get_subscriber(&subscriber_id).unwrap_err().is_not_found());

    // Second unsubscribe: NotFound and no further watch traffic.
    assert!(anchor.notification.unregister(&subscriber_id).await.unwrap_err().is_not_found());
    assert_eq!(transport.calls_to(Method::DELETE, "/watch").len(), 2);
}

/// Records how many subscribers and app events exist when a deploy goes out.
struct StoreObserver {
    state: StateStore,
    seen: Mutex<Vec<(usize, usize, Option<String>)>>,
}

#[async_trait]
impl Transport for StoreObserver {
    async fn send(
        &self,
        _method: Method,
        urls: &[String],
        query: Option<&QueryParams>,
        _body: Option<&[u8]>,
    ) -> Vec<Reply> {
        let subscribers = self.state.list_subscribers().unwrap().len();
        let events = self.state.list_app_events().unwrap().len();
        let event_id = query
            .and_then(|q| q.get("eventid"))
            .and_then(|v| v.first())
            .cloned();
        self.seen.lock().unwrap().push((subscribers, events, event_id));
        urls.iter().map(|_| Reply::new(200, r#"{"id":"A1"}"#)).collect()
    }
}

#[tokio::test]
async fn deploy_event_records_are_transient() {
    let state = StateStore::open_in_memory().unwrap();
    let observer = Arc::new(StoreObserver {
        state: state.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let anchor = Anchor::new(state, observer.clone(), AnchorOptions::default());
    seed_node(&anchor, "N1", "10.0.0.1");
    let mut query = QueryMap::new();
    query.insert("event".to_string(), vec!["http://cb/".to_string()]);

    let outcome = anchor
        .node_apps
        .deploy("N1", &query, br#"{"images":["redis"]}"#)
        .await
        .unwrap();

    assert_eq!(outcome.body, json!({"id": "A1"}));
    let seen = observer.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let (subscribers, events, event_id) = &seen[0];
    assert_eq!((*subscribers, *events), (1, 1));
    assert!(event_id.as_ref().is_some_and(|id| id.len() == 40));
    assert!(anchor.state.list_subscribers().unwrap().is_empty());
    assert!(anchor.state.list_app_events().unwrap().is_empty());
}

#[tokio::test]
async fn holders_are_a_subset_of_members() {
    let transport = Arc::new(ScriptedTransport::new());
    let anchor = anchor_with(transport);
    for (id, ip) in [("N1", "10.0.0.1"), ("N2", "10.0.0.2"), ("N3", "10.0.0.3")] {
        seed_node(&anchor, id, ip);
    }
    anchor.state.add_node_app("N1", "A1").unwrap();
    anchor.state.add_node_app("N3", "A1").unwrap();
    let group = anchor.state.create_group("G").unwrap();
    anchor.state.add_group_member(&group.id, "N1").unwrap();
    anchor.state.add_group_member(&group.id, "N2").unwrap();

    let members = anchor.state.group_members(&group.id).unwrap();
    let holders = anchor.state.group_members_holding_app(&group.id, "A1").unwrap();

    assert_eq!(holders.len(), 1);
    for holder in &holders {
        assert!(holder.holds_app("A1"));
        assert!(members.iter().any(|m| m.id == holder.id));
    }
    for node in anchor.state.list_nodes().unwrap() {
        let found = anchor.state.get_node_by_app(&node.id, "A1").is_ok();
        assert_eq!(found, node.holds_app("A1"));
    }
}
