//! Notification controller: subscriber registry, downstream watches and
//! inbound event demultiplexing.
//!
//! # App subscriptions
//!
//! An app subscription is keyed by the canonical event id of its filter.
//! Registering (or replaying a registration during reconciliation) diffs
//! the nodes the filter matches now against the nodes already watching the
//! event: newly matched nodes get a `POST` watch, nodes that dropped out get
//! a `DELETE` watch. The event keeps only the nodes that accepted.
//!
//! # Node subscriptions
//!
//! Node liveness is observed locally, so nothing is sent downstream. The
//! subscriber is attached to one node event (keyed by node id) per matched
//! node.
//!
//! Register, unregister and reconcile run one at a time behind a single
//! async mutex; each of them reads an event's node list and writes it back.

use std::collections::HashSet;
use std::sync::Arc;

use anchor_client::{Method, Reply, Transport};
use anchor_state::{
    EventId, EventKind, Node, NodeId, NodeStatus, QueryMap, StateStore, Subscriber, SubscriberId,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::Agents;
use crate::error::{AnchorError, AnchorResult};
use crate::filter::{QueryFilter, sha1_hex, subscriber_id};
use crate::result::{Entry, Outcome, Status, aggregate, envelope};
use crate::search::Search;

/// Statuses a deploy-scoped subscriber is told about.
pub const DEPLOY_STATUSES: [&str; 3] = ["pulled", "created", "started"];

/// A validated subscription request.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub url: String,
    pub kind: EventKind,
    pub status: Vec<String>,
}

impl Registration {
    /// Parse `{url, event: {type, status: [...]}}`.
    pub fn parse(body: &[u8]) -> AnchorResult<Self> {
        #[derive(Deserialize)]
        struct Wire {
            url: String,
            event: EventSpec,
        }
        #[derive(Deserialize)]
        struct EventSpec {
            #[serde(rename = "type")]
            kind: EventKind,
            status: Vec<String>,
        }

        let wire: Wire = serde_json::from_slice(body)
            .map_err(|e| AnchorError::InvalidJson(format!("subscription: {e}")))?;
        if wire.url.trim().is_empty() {
            return Err(AnchorError::InvalidJson("subscription url is empty".into()));
        }
        if wire.event.status.is_empty() || wire.event.status.iter().any(|s| s.is_empty()) {
            return Err(AnchorError::InvalidJson(
                "subscription needs at least one non-empty status".into(),
            ));
        }
        Ok(Self {
            url: wire.url,
            kind: wire.event.kind,
            status: wire.event.status,
        })
    }

    fn of(subscriber: &Subscriber) -> Self {
        Self {
            url: subscriber.url.clone(),
            kind: subscriber.kind,
            status: subscriber.status.clone(),
        }
    }
}

/// An event posted back by an agent (or raised locally for node liveness).
#[derive(Debug, Clone)]
struct InboundEvent {
    event_ids: Vec<EventId>,
    status: String,
    event: Map<String, Value>,
}

impl InboundEvent {
    fn parse(body: &[u8]) -> AnchorResult<Self> {
        #[derive(Deserialize)]
        struct Wire {
            eventid: Vec<EventId>,
            event: Map<String, Value>,
        }

        let wire: Wire = serde_json::from_slice(body)
            .map_err(|e| AnchorError::InvalidJson(format!("event notification: {e}")))?;
        let status = wire
            .event
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| AnchorError::InvalidJson("event notification lacks event.status".into()))?
            .to_string();
        Ok(Self {
            event_ids: wire.eventid,
            status,
            event: wire.event,
        })
    }
}

/// One POST to one subscriber.
#[derive(Debug, Clone)]
struct Delivery {
    subscriber: SubscriberId,
    url: String,
    payload: Vec<u8>,
}

pub struct NotificationController {
    state: StateStore,
    search: Search,
    transport: Arc<dyn Transport>,
    agents: Agents,
    registry: Mutex<()>,
}

impl NotificationController {
    pub fn new(state: StateStore, transport: Arc<dyn Transport>, agents: Agents) -> Self {
        Self {
            search: Search::new(state.clone()),
            state,
            transport,
            agents,
            registry: Mutex::new(()),
        }
    }

    /// Subscribe `body.url` to events matching the filter in `query`.
    ///
    /// Answers `{"id": <subscriber id>}`; when some watch registrations
    /// failed, the envelope also lists one entry per newly watched node.
    pub async fn register(&self, query: &QueryMap, body: &[u8]) -> AnchorResult<Outcome> {
        let registration = Registration::parse(body)?;
        let filter = QueryFilter::from_query(query);
        let _guard = self.registry.lock().await;
        let outcome = self
            .apply(&filter.event_id(), &filter, &registration, false)
            .await?;
        info!(
            kind = registration.kind.as_str(),
            url = %registration.url,
            status = outcome.code(),
            "subscriber registered"
        );
        Ok(outcome)
    }

    /// Remove a subscriber and release every event it referenced.
    pub async fn unregister(&self, subscriber_id: &str) -> AnchorResult<Outcome> {
        let _guard = self.registry.lock().await;
        self.release(subscriber_id).await
    }

    /// Replay every subscriber's registration so downstream watches follow
    /// the current fleet. Returns how many replays succeeded.
    pub async fn reconcile_subscribers(&self) -> AnchorResult<usize> {
        let _guard = self.registry.lock().await;
        let mut replayed = 0;
        for subscriber in self.state.list_subscribers()? {
            if subscriber.transient {
                continue;
            }
            let Some(event_id) = subscriber.event_ids.first() else {
                warn!(subscriber_id = %subscriber.id, "subscriber without event id skipped");
                continue;
            };
            let filter = QueryFilter::from_query(&subscriber.query);
            match self
                .apply(event_id, &filter, &Registration::of(&subscriber), true)
                .await
            {
                Ok(_) => replayed += 1,
                Err(e) => {
                    warn!(subscriber_id = %subscriber.id, error = %e, "subscriber reconcile failed");
                }
            }
        }
        debug!(replayed, "subscribers reconciled");
        Ok(replayed)
    }

    /// Run [`reconcile_subscribers`](Self::reconcile_subscribers) in the background.
    pub fn schedule_reconcile(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.reconcile_subscribers().await {
                warn!(error = %e, "background reconcile failed");
            }
        });
    }

    pub fn list_subscribers(&self) -> AnchorResult<Vec<Subscriber>> {
        Ok(self.state.list_subscribers()?)
    }

    pub fn get_subscriber(&self, id: &str) -> AnchorResult<Subscriber> {
        Ok(self.state.get_subscriber(id)?)
    }

    /// Fan an inbound event out to the subscribers that asked for its status.
    ///
    /// Delivery runs in the background; the call returns once it is started.
    pub fn notify(&self, kind: EventKind, body: &[u8]) -> AnchorResult<Outcome> {
        let inbound = InboundEvent::parse(body)?;
        let deliveries = self.plan(kind, &inbound)?;
        debug!(
            kind = kind.as_str(),
            status = %inbound.status,
            subscribers = deliveries.len(),
            "event received"
        );
        let count = deliveries.len();
        if count > 0 {
            tokio::spawn(deliver(Arc::clone(&self.transport), deliveries));
        }
        Ok(Outcome::ok(json!({ "subscribers": count })))
    }

    /// Raise a node liveness event to the node's subscribers.
    pub fn emit_node_status(&self, node_id: &str, status: NodeStatus) {
        let body = json!({
            "eventid": [node_id],
            "event": { "id": node_id, "status": status.as_str() },
        });
        if let Err(e) = self.notify(EventKind::Node, body.to_string().as_bytes()) {
            warn!(%node_id, %status, error = %e, "node event not delivered");
        }
    }

    /// Create a subscriber scoped to one deploy on `node`.
    ///
    /// The event id is salted so it never coincides with a filter event.
    pub(crate) async fn subscribe_deploy(
        &self,
        node: &Node,
        url: &str,
    ) -> AnchorResult<(EventId, SubscriberId)> {
        let _guard = self.registry.lock().await;
        let salt = Uuid::new_v4().to_string();
        let event_id = sha1_hex(&[&node.id, "deploy", &salt]);
        let status: Vec<String> = DEPLOY_STATUSES.iter().map(|s| s.to_string()).collect();
        let id = subscriber_id(&event_id, url, &status);

        self.state.put_subscriber(&Subscriber {
            id: id.clone(),
            kind: EventKind::App,
            url: url.to_string(),
            status,
            event_ids: vec![event_id.clone()],
            query: QueryFilter::node(&node.id).to_query(),
            nodes: Vec::new(),
            transient: true,
        })?;
        self.state.attach_app_event(&event_id, &id, Vec::new())?;
        debug!(node_id = %node.id, %event_id, "deploy subscriber created");
        Ok((event_id, id))
    }

    async fn apply(
        &self,
        event_id: &str,
        filter: &QueryFilter,
        registration: &Registration,
        replay: bool,
    ) -> AnchorResult<Outcome> {
        let id = subscriber_id(event_id, &registration.url, &registration.status);
        self.claim(&id, registration.kind)?;
        let targets = self.targets(filter, replay)?;
        match registration.kind {
            EventKind::App => self.apply_app(&id, event_id, filter, registration, targets).await,
            EventKind::Node => self.apply_node(&id, event_id, filter, registration, targets),
        }
    }

    /// Refuse a subscriber id already held by a subscriber of the other kind.
    fn claim(&self, id: &str, kind: EventKind) -> AnchorResult<()> {
        match self.state.get_subscriber(id) {
            Ok(existing) if existing.kind != kind => Err(AnchorError::Duplicate(format!(
                "subscriber {id} is already registered for {} events",
                existing.kind.as_str()
            ))),
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Nodes the filter matches. On replay, a filter naming a group, node
    /// or app that is gone matches nothing.
    fn targets(&self, filter: &QueryFilter, replay: bool) -> AnchorResult<Vec<Node>> {
        match self.search.nodes(filter) {
            Ok(nodes) => Ok(nodes),
            Err(e) if replay && e.is_not_found() => {
                debug!(error = %e, "filter no longer resolves, withdrawing watches");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_app(
        &self,
        id: &str,
        event_id: &str,
        filter: &QueryFilter,
        registration: &Registration,
        targets: Vec<Node>,
    ) -> AnchorResult<Outcome> {
        let previous = self
            .state
            .find_app_event(event_id)?
            .map(|e| e.nodes)
            .unwrap_or_default();

        let removed: Vec<NodeId> = previous
            .iter()
            .filter(|node_id| !targets.iter().any(|n| &n.id == *node_id))
            .cloned()
            .collect();
        let added: Vec<Node> = targets
            .iter()
            .filter(|n| !previous.contains(&n.id))
            .cloned()
            .collect();

        let body = watch_body(event_id, filter);
        self.unwatch(event_id, &removed, &body).await;

        let urls: Vec<String> = added.iter().map(|n| self.agents.watch(n)).collect();
        let replies = if urls.is_empty() {
            Vec::new()
        } else {
            self.transport
                .send(Method::POST, &urls, None, Some(&body))
                .await
        };

        let mut entries = Vec::with_capacity(added.len());
        let mut accepted = HashSet::new();
        for (node, reply) in added.iter().zip(&replies) {
            if reply.is_success() {
                accepted.insert(node.id.as_str());
            } else {
                warn!(node_id = %node.id, %event_id, code = reply.code, "watch rejected");
            }
            entries.push(Entry::from_reply(&node.id, reply));
        }
        let watched: Vec<NodeId> = targets
            .iter()
            .filter(|n| previous.contains(&n.id) || accepted.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();

        self.state.put_subscriber(&Subscriber {
            id: id.to_string(),
            kind: EventKind::App,
            url: registration.url.clone(),
            status: registration.status.clone(),
            event_ids: vec![event_id.to_string()],
            query: filter.to_query(),
            nodes: Vec::new(),
            transient: false,
        })?;
        self.state.attach_app_event(event_id, id, watched)?;
        debug!(
            %event_id,
            added = added.len(),
            removed = removed.len(),
            "app event reconciled"
        );

        let codes: Vec<u16> = entries.iter().map(|e| e.code).collect();
        Ok(match aggregate(&codes) {
            Status::Ok => Outcome::id(id),
            status => {
                let mut extra = Map::new();
                extra.insert("id".to_string(), Value::String(id.to_string()));
                Outcome::new(status, envelope(&entries, extra))
            }
        })
    }

    fn apply_node(
        &self,
        id: &str,
        event_id: &str,
        filter: &QueryFilter,
        registration: &Registration,
        targets: Vec<Node>,
    ) -> AnchorResult<Outcome> {
        let targets: Vec<NodeId> = targets.into_iter().map(|n| n.id).collect();

        let previous = match self.state.get_subscriber(id) {
            Ok(existing) => existing.nodes,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        for stale in previous.iter().filter(|n| !targets.contains(n)) {
            self.detach_node_event(stale, id)?;
        }
        for node_id in &targets {
            self.state.attach_node_event(node_id, id)?;
        }

        self.state.put_subscriber(&Subscriber {
            id: id.to_string(),
            kind: EventKind::Node,
            url: registration.url.clone(),
            status: registration.status.clone(),
            event_ids: vec![event_id.to_string()],
            query: filter.to_query(),
            nodes: targets,
            transient: false,
        })?;
        Ok(Outcome::id(id))
    }

    async fn release(&self, subscriber_id: &str) -> AnchorResult<Outcome> {
        let subscriber = self.state.get_subscriber(subscriber_id)?;
        match subscriber.kind {
            EventKind::App => {
                let filter = QueryFilter::from_query(&subscriber.query);
                for event_id in &subscriber.event_ids {
                    self.detach_app_event(event_id, subscriber_id, &filter)
                        .await?;
                }
            }
            EventKind::Node => {
                for node_id in &subscriber.nodes {
                    self.detach_node_event(node_id, subscriber_id)?;
                }
            }
        }
        self.state.delete_subscriber(subscriber_id)?;
        info!(%subscriber_id, kind = subscriber.kind.as_str(), "subscriber unregistered");
        Ok(Outcome::id(subscriber_id))
    }

    /// Pull a subscriber from an app event; the last one out deletes the
    /// event and unwatches its nodes.
    async fn detach_app_event(
        &self,
        event_id: &str,
        subscriber_id: &str,
        filter: &QueryFilter,
    ) -> AnchorResult<()> {
        let event = match self.state.unregister_app_event(event_id, subscriber_id) {
            Ok(event) => event,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if event.subscribers.is_empty() {
            self.state.delete_app_event(event_id)?;
            self.unwatch(event_id, &event.nodes, &watch_body(event_id, filter))
                .await;
            debug!(%event_id, "app event released");
        }
        Ok(())
    }

    fn detach_node_event(&self, node_id: &str, subscriber_id: &str) -> AnchorResult<()> {
        let event = match self.state.unregister_node_event(node_id, subscriber_id) {
            Ok(event) => event,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if event.subscribers.is_empty() {
            self.state.delete_node_event(node_id)?;
        }
        Ok(())
    }

    /// Best-effort `DELETE` watch to the given nodes. Nodes no longer in
    /// the store are skipped.
    async fn unwatch(&self, event_id: &str, node_ids: &[NodeId], body: &[u8]) {
        let mut urls = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            match self.state.get_node(node_id) {
                Ok(node) => urls.push(self.agents.watch(&node)),
                Err(e) => debug!(%node_id, %event_id, error = %e, "not unwatching missing node"),
            }
        }
        if urls.is_empty() {
            return;
        }
        let replies = self
            .transport
            .send(Method::DELETE, &urls, None, Some(body))
            .await;
        for (url, reply) in urls.iter().zip(&replies) {
            if !reply.is_success() {
                warn!(%url, %event_id, code = reply.code, "unwatch failed");
            }
        }
    }

    fn plan(&self, kind: EventKind, inbound: &InboundEvent) -> AnchorResult<Vec<Delivery>> {
        let mut seen = HashSet::new();
        let mut deliveries = Vec::new();
        for event_id in &inbound.event_ids {
            let subscribers = match kind {
                EventKind::App => self.state.find_app_event(event_id)?.map(|e| e.subscribers),
                EventKind::Node => self.state.find_node_event(event_id)?.map(|e| e.subscribers),
            };
            let Some(subscribers) = subscribers else {
                debug!(%event_id, "event has no subscribers");
                continue;
            };

            for id in subscribers {
                if seen.contains(&id) {
                    continue;
                }
                let subscriber = match self.state.get_subscriber(&id) {
                    Ok(s) => s,
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e.into()),
                };
                if !subscriber.wants(&inbound.status) {
                    continue;
                }
                let payload = json!({ "subscriberid": id, "event": inbound.event });
                seen.insert(id.clone());
                deliveries.push(Delivery {
                    subscriber: id,
                    url: subscriber.url,
                    payload: payload.to_string().into_bytes(),
                });
            }
        }
        Ok(deliveries)
    }
}

/// `{"eventid", "imagename"?, "appid"?}`
fn watch_body(event_id: &str, filter: &QueryFilter) -> Vec<u8> {
    let mut body = Map::new();
    body.insert("eventid".to_string(), Value::String(event_id.to_string()));
    if let Some(image) = &filter.image_name {
        body.insert("imagename".to_string(), Value::String(image.clone()));
    }
    if let Some(app) = &filter.app_id {
        body.insert("appid".to_string(), Value::String(app.clone()));
    }
    Value::Object(body).to_string().into_bytes()
}

async fn deliver(transport: Arc<dyn Transport>, deliveries: Vec<Delivery>) {
    let mut tasks = JoinSet::new();
    for delivery in deliveries {
        let transport = Arc::clone(&transport);
        tasks.spawn(async move {
            let replies = transport
                .send(
                    Method::POST,
                    std::slice::from_ref(&delivery.url),
                    None,
                    Some(&delivery.payload),
                )
                .await;
            (delivery, replies)
        });
    }
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((delivery, replies)) => {
                if !replies.first().is_some_and(Reply::is_success) {
                    warn!(
                        subscriber_id = %delivery.subscriber,
                        url = %delivery.url,
                        "event delivery failed"
                    );
                }
            }
            Err(e) => warn!(error = %e, "event delivery task aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_client::ScriptedTransport;
    use anchor_state::NodeConfig;

    fn setup() -> (NotificationController, Arc<ScriptedTransport>, StateStore) {
        let state = StateStore::open_in_memory().unwrap();
        for (id, ip) in [("N1", "10.0.0.1"), ("N2", "10.0.0.2")] {
            state
                .add_node(id, ip, NodeStatus::Connected, NodeConfig::default(), Vec::new())
                .unwrap();
        }
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply_any("/watch", 200, "{}");
        let controller =
            NotificationController::new(state.clone(), transport.clone(), Agents::default());
        (controller, transport, state)
    }

    fn body(url: &str, kind: &str, status: &[&str]) -> Vec<u8> {
        json!({"url": url, "event": {"type": kind, "status": status}})
            .to_string()
            .into_bytes()
    }

    fn node_query(id: &str) -> QueryMap {
        QueryFilter::node(id).to_query()
    }

    #[test]
    fn registration_validation() {
        assert!(Registration::parse(b"not json").is_err());
        assert!(Registration::parse(&body("", "app", &["started"])).is_err());
        assert!(Registration::parse(&body("http://cb", "app", &[])).is_err());
        assert!(Registration::parse(&body("http://cb", "cluster", &["x"])).is_err());

        let reg = Registration::parse(&body("http://cb", "node", &["disconnected"])).unwrap();
        assert_eq!(reg.kind, EventKind::Node);
        assert_eq!(reg.status, vec!["disconnected"]);
    }

    #[test]
    fn inbound_needs_status() {
        let err = InboundEvent::parse(br#"{"eventid":["e"],"event":{}}"#).unwrap_err();
        assert!(matches!(err, AnchorError::InvalidJson(_)));
        assert!(InboundEvent::parse(br#"{"event":{"status":"started"}}"#).is_err());
    }

    #[tokio::test]
    async fn app_subscription_watches_matched_nodes() {
        let (controller, transport, state) = setup();

        let outcome = controller
            .register(&QueryMap::new(), &body("http://cb/", "app", &["started"]))
            .await
            .unwrap();
        assert_eq!(outcome.status, Status::Ok);

        let event_id = QueryFilter::default().event_id();
        let sid = subscriber_id(&event_id, "http://cb/", &["started".to_string()]);
        assert_eq!(outcome.body["id"], sid.as_str());

        let posts = transport.calls_to(Method::POST, "/watch");
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].json().unwrap(), json!({"eventid": event_id}));

        let event = state.get_app_event(&event_id).unwrap();
        assert_eq!(event.nodes, vec!["N1", "N2"]);
        assert_eq!(event.subscribers, vec![sid]);
    }

    #[tokio::test]
    async fn second_subscriber_shares_the_event() {
        let (controller, transport, state) = setup();
        let query = node_query("N1");

        controller
            .register(&query, &body("http://a/", "app", &["started"]))
            .await
            .unwrap();
        controller
            .register(&query, &body("http://b/", "app", &["started"]))
            .await
            .unwrap();

        assert_eq!(transport.calls_to(Method::POST, "/watch").len(), 1);
        let event = state
            .get_app_event(&QueryFilter::node("N1").event_id())
            .unwrap();
        assert_eq!(event.subscribers.len(), 2);
    }

    #[tokio::test]
    async fn rejected_watch_is_reported_and_not_recorded() {
        let state = StateStore::open_in_memory().unwrap();
        for (id, ip) in [("N1", "10.0.0.1"), ("N2", "10.0.0.2")] {
            state
                .add_node(id, ip, NodeStatus::Connected, NodeConfig::default(), Vec::new())
                .unwrap();
        }
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply_any("10.0.0.1", 200, "{}")
            .reply_any("10.0.0.2", 503, r#"{"message":"busy"}"#);
        let controller =
            NotificationController::new(state.clone(), transport.clone(), Agents::default());

        let outcome = controller
            .register(&QueryMap::new(), &body("http://cb/", "app", &["started"]))
            .await
            .unwrap();

        assert_eq!(outcome.status, Status::MultiStatus);
        assert_eq!(outcome.body["responses"][1]["id"], "N2");
        assert_eq!(outcome.body["responses"][1]["message"], "busy");
        let event = state
            .get_app_event(&QueryFilter::default().event_id())
            .unwrap();
        assert_eq!(event.nodes, vec!["N1"]);
    }

    #[tokio::test]
    async fn node_subscription_attaches_node_events() {
        let (controller, transport, state) = setup();

        let outcome = controller
            .register(&QueryMap::new(), &body("http://cb/", "node", &["disconnected"]))
            .await
            .unwrap();
        let sid = outcome.body["id"].as_str().unwrap().to_string();

        assert!(transport.calls().is_empty());
        assert_eq!(state.get_node_event("N1").unwrap().subscribers, vec![sid.clone()]);
        assert_eq!(state.get_node_event("N2").unwrap().subscribers, vec![sid.clone()]);
        assert_eq!(state.get_subscriber(&sid).unwrap().nodes, vec!["N1", "N2"]);

        controller.unregister(&sid).await.unwrap();
        assert!(state.find_node_event("N1").unwrap().is_none());
        assert!(state.find_node_event("N2").unwrap().is_none());
    }

    #[tokio::test]
    async fn unregister_twice_is_not_found() {
        let (controller, transport, state) = setup();
        let outcome = controller
            .register(&node_query("N1"), &body("http://cb/", "app", &["started"]))
            .await
            .unwrap();
        let sid = outcome.body["id"].as_str().unwrap().to_string();

        controller.unregister(&sid).await.unwrap();
        assert_eq!(transport.calls_to(Method::DELETE, "/watch").len(), 1);
        assert!(state.list_app_events().unwrap().is_empty());

        let err = controller.unregister(&sid).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(transport.calls_to(Method::DELETE, "/watch").len(), 1);
    }

    #[tokio::test]
    async fn reconcile_drops_unmatched_nodes() {
        let (controller, transport, state) = setup();
        let group = state.create_group("g").unwrap();
        state.add_group_member(&group.id, "N1").unwrap();
        state.add_group_member(&group.id, "N2").unwrap();
        let mut query = QueryMap::new();
        query.insert("groupId".into(), vec![group.id.clone()]);

        controller
            .register(&query, &body("http://cb/", "app", &["started"]))
            .await
            .unwrap();
        state.remove_group_member(&group.id, "N2").unwrap();
        transport.clear_calls();

        assert_eq!(controller.reconcile_subscribers().await.unwrap(), 1);

        let deletes = transport.calls_to(Method::DELETE, "/watch");
        assert_eq!(deletes.len(), 1);
        assert!(deletes[0].url.contains("10.0.0.2"));
        assert!(transport.calls_to(Method::POST, "/watch").is_empty());
        let event_id = QueryFilter::from_query(&query).event_id();
        assert_eq!(state.get_app_event(&event_id).unwrap().nodes, vec!["N1"]);
    }

    #[tokio::test]
    async fn reconcile_withdraws_watches_of_deleted_group() {
        let (controller, transport, state) = setup();
        let group = state.create_group("g").unwrap();
        state.add_group_member(&group.id, "N1").unwrap();
        let mut query = QueryMap::new();
        query.insert("groupId".into(), vec![group.id.clone()]);
        controller
            .register(&query, &body("http://cb/", "app", &["started"]))
            .await
            .unwrap();
        state.delete_group(&group.id).unwrap();
        transport.clear_calls();

        assert_eq!(controller.reconcile_subscribers().await.unwrap(), 1);

        let deletes = transport.calls_to(Method::DELETE, "/watch");
        assert_eq!(deletes.len(), 1);
        assert!(deletes[0].url.contains("10.0.0.1"));
        let event_id = QueryFilter::from_query(&query).event_id();
        assert!(state.get_app_event(&event_id).unwrap().nodes.is_empty());

        // A fresh registration against the missing group is still rejected.
        let err = controller
            .register(&query, &body("http://other/", "app", &["started"]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn reconcile_skips_deploy_subscribers() {
        let (controller, transport, state) = setup();
        let node = state.get_node("N1").unwrap();
        let (event_id, sid) = controller.subscribe_deploy(&node, "http://cb/").await.unwrap();
        transport.clear_calls();

        assert_eq!(controller.reconcile_subscribers().await.unwrap(), 0);

        assert!(transport.calls().is_empty());
        assert!(state.get_app_event(&event_id).unwrap().nodes.is_empty());
        assert!(state.get_subscriber(&sid).unwrap().transient);
    }

    #[tokio::test]
    async fn same_identity_for_other_kind_is_duplicate() {
        let (controller, transport, state) = setup();
        let query = node_query("N1");
        let outcome = controller
            .register(&query, &body("http://cb/", "app", &["started"]))
            .await
            .unwrap();
        let sid = outcome.body["id"].as_str().unwrap().to_string();

        let err = controller
            .register(&query, &body("http://cb/", "node", &["started"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorError::Duplicate(_)));
        assert_eq!(state.get_subscriber(&sid).unwrap().kind, EventKind::App);
        assert!(state.find_node_event("N1").unwrap().is_none());

        controller.unregister(&sid).await.unwrap();

        assert!(state.list_app_events().unwrap().is_empty());
        assert_eq!(transport.calls_to(Method::DELETE, "/watch").len(), 1);
    }

    #[tokio::test]
    async fn deliveries_follow_status_filter() {
        let (controller, _, _) = setup();
        let query = node_query("N1");
        controller
            .register(&query, &body("http://started/", "app", &["started"]))
            .await
            .unwrap();
        controller
            .register(&query, &body("http://stopped/", "app", &["stopped"]))
            .await
            .unwrap();

        let event_id = QueryFilter::node("N1").event_id();
        let inbound = InboundEvent::parse(
            json!({"eventid": [event_id, event_id], "event": {"status": "started", "app": "A1"}})
                .to_string()
                .as_bytes(),
        )
        .unwrap();

        let deliveries = controller.plan(EventKind::App, &inbound).unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].url, "http://started/");
        let payload: Value = serde_json::from_slice(&deliveries[0].payload).unwrap();
        assert_eq!(payload["event"]["app"], "A1");
        assert_eq!(payload["subscriberid"], deliveries[0].subscriber.as_str());
    }

    #[tokio::test]
    async fn deploy_subscriber_uses_salted_event() {
        let (controller, _, state) = setup();
        let node = state.get_node("N1").unwrap();

        let (first, sid) = controller.subscribe_deploy(&node, "http://cb/").await.unwrap();
        let (second, _) = controller.subscribe_deploy(&node, "http://cb/").await.unwrap();
        assert_ne!(first, second);
        assert_ne!(first, QueryFilter::node("N1").event_id());

        let subscriber = state.get_subscriber(&sid).unwrap();
        assert_eq!(subscriber.status, DEPLOY_STATUSES);
        assert_eq!(subscriber.id, subscriber_id(&first, "http://cb/", &subscriber.status));
    }
}
