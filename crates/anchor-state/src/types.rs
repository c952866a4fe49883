//! Domain types for the Anchor state store.
//!
//! These types are the persisted records of nodes, groups, apps,
//! subscribers and events. All of them serialize to/from JSON both for
//! storage in redb tables and on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique identifier for an edge node.
pub type NodeId = String;

/// Unique identifier for a node group.
pub type GroupId = String;

/// Unique identifier for an installed app, as reported by the agent.
pub type AppId = String;

/// SHA1-derived identifier of a notification subscriber.
pub type SubscriberId = String;

/// Identifier of an event record (filter hash for app events, node id for node events).
pub type EventId = String;

/// Multi-valued query filter as received on the wire (`key → [values]`).
pub type QueryMap = BTreeMap<String, Vec<String>>;

/// Configuration property key carrying the caller-chosen node id.
pub const DEVICE_ID_PROPERTY: &str = "deviceid";

// ── Node ──────────────────────────────────────────────────────────

/// Liveness status of an edge node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Connected,
    Disconnected,
}

impl NodeStatus {
    /// Wire representation, also used as the node event status.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Connected => "connected",
            NodeStatus::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node configuration as pushed by the agent at registration.
///
/// `properties` is a list of single-key maps, e.g.
/// `[{"deviceid": "N1"}, {"devicename": "edge-01"}]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    #[serde(default)]
    pub properties: Vec<BTreeMap<String, serde_json::Value>>,
}

impl NodeConfig {
    /// First string value stored under `key` in the property list.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find_map(|entry| entry.get(key))
            .and_then(|v| v.as_str())
    }

    /// The caller-supplied device id, if present and non-empty.
    pub fn device_id(&self) -> Option<&str> {
        self.property(DEVICE_ID_PROPERTY).filter(|id| !id.is_empty())
    }
}

/// A registered edge node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub ip: String,
    pub status: NodeStatus,
    /// Ids of the apps installed on this node (set semantics, insertion order).
    #[serde(default)]
    pub apps: Vec<AppId>,
    #[serde(default)]
    pub config: NodeConfig,
}

impl Node {
    /// Whether this node currently holds `app_id`.
    pub fn holds_app(&self, app_id: &str) -> bool {
        self.apps.iter().any(|a| a == app_id)
    }
}

// ── Group ─────────────────────────────────────────────────────────

/// A named set of nodes addressed together by group deployments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Member node ids in join order, without duplicates.
    #[serde(default)]
    pub members: Vec<NodeId>,
}

// ── App ───────────────────────────────────────────────────────────

/// An app known to the fleet, created by the first successful deploy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub id: AppId,
    /// Image references named by the deployment descriptor.
    #[serde(default)]
    pub images: Vec<String>,
    /// The deployment descriptor as returned by the agent.
    #[serde(default)]
    pub description: String,
}

impl App {
    pub fn uses_image(&self, image: &str) -> bool {
        self.images.iter().any(|i| i == image)
    }
}

// ── Notification ──────────────────────────────────────────────────

/// Which lifecycle a subscriber listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    App,
    Node,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::App => "app",
            EventKind::Node => "node",
        }
    }
}

/// An HTTP endpoint that wants lifecycle events matching a query filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscriber {
    pub id: SubscriberId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Callback target for event delivery.
    pub url: String,
    /// Event statuses this subscriber wants delivered.
    pub status: Vec<String>,
    /// Event ids this subscriber is identified by; the first is the filter event id.
    #[serde(rename = "eventid")]
    pub event_ids: Vec<EventId>,
    /// The filter this subscriber registered with.
    #[serde(default)]
    pub query: QueryMap,
    /// Node events this subscriber is attached to (node subscribers only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeId>,
    /// Scoped to a single deploy; reconciliation never replays it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transient: bool,
}

impl Subscriber {
    /// Whether an event with `status` should be delivered to this subscriber.
    pub fn wants(&self, status: &str) -> bool {
        self.status.iter().any(|s| s == status)
    }
}

/// Subscribers of one app-event filter and the nodes currently watching it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppEvent {
    pub id: EventId,
    #[serde(default)]
    pub subscribers: Vec<SubscriberId>,
    /// Nodes that accepted the downstream watch for this event.
    #[serde(default)]
    pub nodes: Vec<NodeId>,
}

/// Subscribers of one node's liveness transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeEvent {
    /// Equal to the node id.
    pub id: EventId,
    #[serde(default)]
    pub subscribers: Vec<SubscriberId>,
}

/// Insert `value` into a set-semantics list. Returns true if it was added.
pub fn set_insert(list: &mut Vec<String>, value: &str) -> bool {
    if list.iter().any(|v| v == value) {
        false
    } else {
        list.push(value.to_string());
        true
    }
}

/// Remove `value` from a set-semantics list. Returns true if it was present.
pub fn set_remove(list: &mut Vec<String>, value: &str) -> bool {
    let before = list.len();
    list.retain(|v| v != value);
    list.len() != before
}
