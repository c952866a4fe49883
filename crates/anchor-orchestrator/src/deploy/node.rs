//! Node deployment controller: app lifecycle on a single node.
//!
//! The answer is `Ok` iff the agent answered 2xx. A failed agent call turns
//! into an `Error` outcome carrying the agent's message; the store is only
//! written after a successful call.

use std::sync::Arc;

use anchor_client::{QueryParams, Reply, Transport};
use anchor_state::{Node, QueryMap, StateStore};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{
    Verb, installed_app, optional_body, record_install, record_removal, release_if_orphaned,
};
use crate::agent::Agents;
use crate::error::{AnchorError, AnchorResult};
use crate::notification::NotificationController;
use crate::result::{Outcome, agent_message};

/// Query parameter naming a callback for this deploy's progress events.
pub const EVENT_PARAM: &str = "event";

pub struct NodeDeployment {
    state: StateStore,
    transport: Arc<dyn Transport>,
    agents: Agents,
    notification: Arc<NotificationController>,
}

impl NodeDeployment {
    pub fn new(
        state: StateStore,
        transport: Arc<dyn Transport>,
        agents: Agents,
        notification: Arc<NotificationController>,
    ) -> Self {
        Self {
            state,
            transport,
            agents,
            notification,
        }
    }

    /// Install the app described by `body` on a node.
    ///
    /// With `?event=<url>`, a subscriber scoped to this deploy receives the
    /// `pulled`, `created` and `started` transitions; it exists only while
    /// the agent call is in flight.
    pub async fn deploy(&self, node_id: &str, query: &QueryMap, body: &[u8]) -> AnchorResult<Outcome> {
        let node = self.state.get_node(node_id)?;
        let callback = query
            .get(EVENT_PARAM)
            .and_then(|values| values.first())
            .filter(|url| !url.is_empty());

        let reply = match callback {
            Some(url) => {
                let (event_id, subscriber_id) =
                    self.notification.subscribe_deploy(&node, url).await?;
                let mut params = QueryParams::new();
                params.insert("eventid".to_string(), vec![event_id]);

                let reply = self
                    .call(&node, Verb::Deploy, "", Some(&params), optional_body(body))
                    .await;
                if let Err(e) = self.notification.unregister(&subscriber_id).await {
                    warn!(%node_id, %subscriber_id, error = %e, "deploy subscriber not torn down");
                }
                reply
            }
            None => {
                self.call(&node, Verb::Deploy, "", None, optional_body(body))
                    .await
            }
        };

        if !reply.is_success() {
            warn!(%node_id, code = reply.code, "deploy rejected by agent");
            return Ok(Outcome::error(agent_message(&reply)));
        }
        let (app_id, description) = installed_app(&reply).ok_or_else(|| {
            AnchorError::Internal(format!("deploy on node {node_id} answered without an app id"))
        })?;

        record_install(&self.state, node_id, &app_id, &description)?;
        info!(%node_id, %app_id, "app deployed");
        self.notification.schedule_reconcile();
        Ok(Outcome::id(&app_id))
    }

    /// The agent's app list, passed through.
    pub async fn get_apps(&self, node_id: &str) -> AnchorResult<Outcome> {
        let node = self.state.get_node(node_id)?;
        let reply = self.call(&node, Verb::GetApps, "", None, None).await;
        passthrough(node_id, &reply)
    }

    /// The agent's view of one app, passed through.
    pub async fn get_app(&self, node_id: &str, app_id: &str) -> AnchorResult<Outcome> {
        let node = self.state.get_node_by_app(node_id, app_id)?;
        let reply = self.call(&node, Verb::GetApp, app_id, None, None).await;
        passthrough(node_id, &reply)
    }

    /// Remove an app from a node; the app record goes once no node holds it.
    pub async fn delete(&self, node_id: &str, app_id: &str) -> AnchorResult<Outcome> {
        let node = self.state.get_node_by_app(node_id, app_id)?;
        let reply = self.call(&node, Verb::Delete, app_id, None, None).await;
        if !reply.is_success() {
            warn!(%node_id, %app_id, code = reply.code, "delete rejected by agent");
            return Ok(Outcome::error(agent_message(&reply)));
        }

        record_removal(&self.state, node_id, app_id)?;
        release_if_orphaned(&self.state, app_id)?;
        info!(%node_id, %app_id, "app deleted");
        self.notification.schedule_reconcile();
        Ok(Outcome::ok(json!({})))
    }

    pub async fn update_info(&self, node_id: &str, app_id: &str, body: &[u8]) -> AnchorResult<Outcome> {
        self.control(node_id, app_id, Verb::UpdateInfo, body).await
    }

    pub async fn update(&self, node_id: &str, app_id: &str, body: &[u8]) -> AnchorResult<Outcome> {
        self.control(node_id, app_id, Verb::Update, body).await
    }

    pub async fn start(&self, node_id: &str, app_id: &str) -> AnchorResult<Outcome> {
        self.control(node_id, app_id, Verb::Start, &[]).await
    }

    pub async fn stop(&self, node_id: &str, app_id: &str) -> AnchorResult<Outcome> {
        self.control(node_id, app_id, Verb::Stop, &[]).await
    }

    async fn control(
        &self,
        node_id: &str,
        app_id: &str,
        verb: Verb,
        body: &[u8],
    ) -> AnchorResult<Outcome> {
        debug_assert!(verb.is_control());
        let node = self.state.get_node_by_app(node_id, app_id)?;
        let reply = self
            .call(&node, verb, app_id, None, optional_body(body))
            .await;
        if reply.is_success() {
            info!(%node_id, %app_id, verb = verb.as_str(), "app lifecycle call succeeded");
            Ok(Outcome::ok(json!({})))
        } else {
            warn!(%node_id, %app_id, verb = verb.as_str(), code = reply.code, "app lifecycle call rejected");
            Ok(Outcome::error(agent_message(&reply)))
        }
    }

    async fn call(
        &self,
        node: &Node,
        verb: Verb,
        app_id: &str,
        query: Option<&QueryParams>,
        body: Option<&[u8]>,
    ) -> Reply {
        let url = self.agents.management(node, &verb.suffix(app_id));
        let mut replies = self
            .transport
            .send(verb.method(), std::slice::from_ref(&url), query, body)
            .await;
        let reply = replies.pop().unwrap_or_else(Reply::failed);
        debug!(node_id = %node.id, verb = verb.as_str(), code = reply.code, "agent call");
        reply
    }
}

/// Successful reads answer with the agent's JSON as-is.
fn passthrough(node_id: &str, reply: &Reply) -> AnchorResult<Outcome> {
    if !reply.is_success() {
        return Ok(Outcome::error(agent_message(reply)));
    }
    let body: Value = serde_json::from_str(&reply.body).map_err(|e| {
        AnchorError::Internal(format!("unreadable agent response from node {node_id}: {e}"))
    })?;
    Ok(Outcome::ok(body))
}
