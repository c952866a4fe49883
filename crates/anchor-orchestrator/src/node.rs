//! Node manager: registration, liveness pings and configuration.

use std::sync::Arc;

use anchor_client::{Method, Reply, Transport};
use anchor_health::{LivenessScheduler, PingOutcome};
use anchor_state::{AppId, Node, NodeConfig, NodeStatus, QueryMap, StateError, StateStore};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::Agents;
use crate::error::{AnchorError, AnchorResult};
use crate::notification::NotificationController;
use crate::result::Outcome;

/// Fresh ids drawn before registration gives up.
const MAX_ID_ATTEMPTS: usize = 16;

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    ip: String,
    config: NodeConfig,
    #[serde(default)]
    apps: Vec<AppId>,
}

#[derive(Debug, Deserialize)]
struct ConfigRequest {
    config: NodeConfig,
}

pub struct NodeManager {
    state: StateStore,
    transport: Arc<dyn Transport>,
    agents: Agents,
    liveness: Arc<LivenessScheduler>,
    notification: Arc<NotificationController>,
}

impl NodeManager {
    pub fn new(
        state: StateStore,
        transport: Arc<dyn Transport>,
        agents: Agents,
        liveness: Arc<LivenessScheduler>,
        notification: Arc<NotificationController>,
    ) -> Self {
        Self {
            state,
            transport,
            agents,
            liveness,
            notification,
        }
    }

    /// Register a node from `{ip, config, apps?}`; answers `{"id"}`.
    ///
    /// The id is the config's `deviceid` when present. A known `deviceid`,
    /// or a known ip when there is none, refreshes the existing node
    /// instead of creating another one.
    pub async fn register(&self, body: &[u8]) -> AnchorResult<Outcome> {
        let request: RegisterRequest = parse_body(body, "node registration")?;
        if request.ip.trim().is_empty() {
            return Err(AnchorError::InvalidJson("node ip is empty".into()));
        }

        let node = self.admit(request)?;
        info!(node_id = %node.id, ip = %node.ip, "node registered");
        self.notification.schedule_reconcile();
        self.notification
            .emit_node_status(&node.id, NodeStatus::Connected);
        Ok(Outcome::id(&node.id))
    }

    fn admit(&self, request: RegisterRequest) -> AnchorResult<Node> {
        let RegisterRequest { ip, config, apps } = request;

        if let Some(device_id) = config.device_id().map(str::to_string) {
            return match self.state.get_node(&device_id) {
                Ok(_) => {
                    debug!(node_id = %device_id, %ip, "known device re-registered");
                    Ok(self
                        .state
                        .refresh_node(&device_id, &ip, config, NodeStatus::Connected)?)
                }
                Err(e) if e.is_not_found() => Ok(self.state.add_node(
                    &device_id,
                    &ip,
                    NodeStatus::Connected,
                    config,
                    apps,
                )?),
                Err(e) => Err(e.into()),
            };
        }

        match self.state.get_node_by_ip(&ip) {
            Ok(existing) => {
                debug!(node_id = %existing.id, %ip, "known address re-registered");
                return Ok(self
                    .state
                    .refresh_node(&existing.id, &ip, config, NodeStatus::Connected)?);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = Uuid::new_v4().to_string();
            match self.state.add_node(
                &id,
                &ip,
                NodeStatus::Connected,
                config.clone(),
                apps.clone(),
            ) {
                Ok(node) => return Ok(node),
                Err(StateError::Duplicate(_)) => debug!(node_id = %id, "node id collision, drawing again"),
                Err(e) => return Err(e.into()),
            }
        }
        Err(AnchorError::Duplicate(format!(
            "no free node id after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    /// Forget a node: tell its agent (best effort), stop its watchdog,
    /// delete it and pull it out of every group.
    pub async fn unregister(&self, node_id: &str) -> AnchorResult<Outcome> {
        let node = self.state.get_node(node_id)?;

        let url = self.agents.unregister(&node);
        let replies = self
            .transport
            .send(Method::POST, std::slice::from_ref(&url), None, None)
            .await;
        if !replies.first().is_some_and(Reply::is_success) {
            warn!(%node_id, %url, "agent did not acknowledge unregister");
        }

        self.liveness.cancel(node_id).await;
        self.state.delete_node(node_id)?;
        let groups = self.state.remove_node_from_groups(node_id)?;
        info!(%node_id, groups = groups.len(), "node unregistered");
        self.notification.schedule_reconcile();
        Ok(Outcome::id(node_id))
    }

    /// Record a ping announcing the next one within `interval` units.
    pub async fn ping(&self, node_id: &str, body: &[u8]) -> AnchorResult<Outcome> {
        self.state.get_node(node_id)?;
        let interval = parse_interval(body)?;
        let outcome = self.liveness.ping(node_id, interval).await?;
        debug!(%node_id, interval, ?outcome, "ping");
        Ok(Outcome::ok(json!({
            "id": node_id,
            "status": NodeStatus::Connected,
            "reconnected": outcome == PingOutcome::Reconnected,
        })))
    }

    pub fn get(&self, node_id: &str) -> AnchorResult<Node> {
        Ok(self.state.get_node(node_id)?)
    }

    /// All nodes, or only those whose status matches `?status=`.
    pub fn list(&self, query: &QueryMap) -> AnchorResult<Vec<Node>> {
        match query.get("status").and_then(|v| v.first()) {
            Some(status) => Ok(self.state.list_nodes_with_status(parse_status(status)?)?),
            None => Ok(self.state.list_nodes()?),
        }
    }

    pub fn configuration(&self, node_id: &str) -> AnchorResult<NodeConfig> {
        Ok(self.state.get_node(node_id)?.config)
    }

    /// Replace a node's configuration from `{config: {...}}`.
    pub fn set_configuration(&self, node_id: &str, body: &[u8]) -> AnchorResult<Outcome> {
        let request: ConfigRequest = parse_body(body, "node configuration")?;
        self.state.update_node_config(node_id, request.config)?;
        info!(%node_id, "node configuration replaced");
        Ok(Outcome::id(node_id))
    }
}

pub fn parse_status(value: &str) -> AnchorResult<NodeStatus> {
    match value {
        "connected" => Ok(NodeStatus::Connected),
        "disconnected" => Ok(NodeStatus::Disconnected),
        other => Err(AnchorError::InvalidParam(format!("unknown node status {other:?}"))),
    }
}

pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8], what: &str) -> AnchorResult<T> {
    serde_json::from_slice(body).map_err(|e| AnchorError::InvalidJson(format!("{what}: {e}")))
}

/// `interval` as a non-negative integer, given as a string or a number.
fn parse_interval(body: &[u8]) -> AnchorResult<u64> {
    let value: Value = parse_body(body, "ping")?;
    let interval = match value.get("interval") {
        Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
        Some(Value::Number(number)) => number.as_u64(),
        _ => None,
    };
    interval.ok_or_else(|| {
        AnchorError::InvalidJson("ping interval must be a non-negative integer".into())
    })
}
