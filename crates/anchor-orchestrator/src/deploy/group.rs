//! Group deployment controller: the fan-out core.
//!
//! Every verb resolves a member list (all members for `Deploy` and
//! `GetApps`, members holding the app otherwise), sends one request per
//! member in member order, folds the codes into a three-valued status and
//! reconciles the store for the members that succeeded. The reply slots,
//! the envelope entries and the reconciliation all index by member position.
//!
//! A group deploy installs one app. The first member that reports success
//! fixes the app id; a later member reporting another id is treated as
//! failed and not recorded.

use std::sync::Arc;

use anchor_client::{Reply, Transport};
use anchor_state::{AppId, Node, NodeId, StateStore};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::{
    Verb, installed_app, optional_body, record_install, record_removal, release_if_orphaned,
};
use crate::agent::Agents;
use crate::error::AnchorResult;
use crate::notification::NotificationController;
use crate::result::{Entry, Outcome, Status, aggregate, envelope};

pub struct GroupDeployment {
    state: StateStore,
    transport: Arc<dyn Transport>,
    agents: Agents,
    notification: Arc<NotificationController>,
}

impl GroupDeployment {
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

    /// Install the app described by `body` on every member.
    pub async fn deploy(&self, group_id: &str, body: &[u8]) -> AnchorResult<Outcome> {
        let members = self.state.group_members(group_id)?;
        if members.is_empty() {
            return Ok(empty_batch());
        }
        let replies = self
            .fan_out(&members, Verb::Deploy, "", optional_body(body))
            .await;

        let mut app: Option<AppId> = None;
        let mut installs: Vec<(NodeId, AppId, String)> = Vec::new();
        let mut entries = Vec::with_capacity(members.len());
        for (node, reply) in members.iter().zip(&replies) {
            if !reply.is_success() {
                entries.push(Entry::from_reply(&node.id, reply));
                continue;
            }
            let Some((app_id, description)) = installed_app(reply) else {
                warn!(%group_id, node_id = %node.id, "deploy answered without an app id");
                entries.push(Entry::rejected(&node.id, "agent answered without an app id"));
                continue;
            };
            if let Some(expected) = app.as_ref().filter(|expected| **expected != app_id) {
                warn!(%group_id, node_id = %node.id, %app_id, %expected, "member installed a different app");
                entries.push(Entry::rejected(
                    &node.id,
                    format!("agent installed app {app_id}, expected {expected}"),
                ));
                continue;
            }
            app.get_or_insert_with(|| app_id.clone());
            entries.push(Entry::from_reply(&node.id, reply));
            installs.push((node.id.clone(), app_id, description));
        }

        for (node_id, app_id, description) in &installs {
            record_install(&self.state, node_id, app_id, description)?;
        }
        if !installs.is_empty() {
            self.notification.schedule_reconcile();
        }

        let status = aggregate(&codes(&entries));
        info!(
            %group_id,
            app_id = app.as_deref().unwrap_or("-"),
            installed = installs.len(),
            members = members.len(),
            status = status.code(),
            "group deploy finished"
        );
        let mut extra = Map::new();
        if let Some(app_id) = app {
            extra.insert("id".to_string(), Value::String(app_id));
        }
        Ok(match status {
            Status::Ok => Outcome::ok(Value::Object(extra)),
            status => Outcome::new(status, envelope(&entries, extra)),
        })
    }

    /// Every member's app list, one envelope entry per member.
    pub async fn get_apps(&self, group_id: &str) -> AnchorResult<Outcome> {
        let members = self.state.group_members(group_id)?;
        self.read(&members, Verb::GetApps, "").await
    }

    /// One app as seen by each member holding it.
    pub async fn get_app(&self, group_id: &str, app_id: &str) -> AnchorResult<Outcome> {
        let members = self.state.group_members_holding_app(group_id, app_id)?;
        self.read(&members, Verb::GetApp, app_id).await
    }

    /// Remove an app from every member holding it.
    pub async fn delete(&self, group_id: &str, app_id: &str) -> AnchorResult<Outcome> {
        let members = self.state.group_members_holding_app(group_id, app_id)?;
        if members.is_empty() {
            return Ok(empty_batch());
        }
        let replies = self.fan_out(&members, Verb::Delete, app_id, None).await;

        let mut removed = 0;
        for (node, reply) in members.iter().zip(&replies) {
            if reply.is_success() {
                record_removal(&self.state, &node.id, app_id)?;
                removed += 1;
            }
        }
        if removed > 0 {
            release_if_orphaned(&self.state, app_id)?;
            self.notification.schedule_reconcile();
        }
        info!(%group_id, %app_id, removed, members = members.len(), "group delete finished");
        Ok(self.summarize(&members, &replies))
    }

    pub async fn update_info(&self, group_id: &str, app_id: &str, body: &[u8]) -> AnchorResult<Outcome> {
        self.control(group_id, app_id, Verb::UpdateInfo, body).await
    }

    pub async fn update(&self, group_id: &str, app_id: &str, body: &[u8]) -> AnchorResult<Outcome> {
        self.control(group_id, app_id, Verb::Update, body).await
    }

    pub async fn start(&self, group_id: &str, app_id: &str) -> AnchorResult<Outcome> {
        self.control(group_id, app_id, Verb::Start, &[]).await
    }

    pub async fn stop(&self, group_id: &str, app_id: &str) -> AnchorResult<Outcome> {
        self.control(group_id, app_id, Verb::Stop, &[]).await
    }

    async fn control(
        &self,
        group_id: &str,
        app_id: &str,
        verb: Verb,
        body: &[u8],
    ) -> AnchorResult<Outcome> {
        debug_assert!(verb.is_control());
        let members = self.state.group_members_holding_app(group_id, app_id)?;
        if members.is_empty() {
            return Ok(empty_batch());
        }
        let replies = self
            .fan_out(&members, verb, app_id, optional_body(body))
            .await;
        let outcome = self.summarize(&members, &replies);
        info!(%group_id, %app_id, verb = verb.as_str(), status = outcome.code(), "group lifecycle call finished");
        Ok(outcome)
    }

    /// Reads always answer with the envelope; successful entries carry the
    /// member's response.
    async fn read(&self, members: &[Node], verb: Verb, app_id: &str) -> AnchorResult<Outcome> {
        let replies = self.fan_out(members, verb, app_id, None).await;
        let entries: Vec<Entry> = members
            .iter()
            .zip(&replies)
            .map(|(node, reply)| Entry::from_reply(&node.id, reply).spread(reply))
            .collect();
        let status = aggregate(&codes(&entries));
        Ok(Outcome::new(status, envelope(&entries, Map::new())))
    }

    /// `{}` when every member succeeded, the envelope otherwise.
    fn summarize(&self, members: &[Node], replies: &[Reply]) -> Outcome {
        let entries: Vec<Entry> = members
            .iter()
            .zip(replies)
            .map(|(node, reply)| Entry::from_reply(&node.id, reply))
            .collect();
        match aggregate(&codes(&entries)) {
            Status::Ok => Outcome::ok(json!({})),
            status => Outcome::new(status, envelope(&entries, Map::new())),
        }
    }

    /// One request per member; `replies[i]` belongs to `members[i]`.
    async fn fan_out(
        &self,
        members: &[Node],
        verb: Verb,
        app_id: &str,
        body: Option<&[u8]>,
    ) -> Vec<Reply> {
        if members.is_empty() {
            return Vec::new();
        }
        let urls = self.agents.management_all(members, &verb.suffix(app_id));
        let mut replies = self.transport.send(verb.method(), &urls, None, body).await;
        if replies.len() != urls.len() {
            warn!(expected = urls.len(), got = replies.len(), "transport returned a short batch");
            replies.resize_with(urls.len(), Reply::failed);
        }
        debug!(verb = verb.as_str(), targets = urls.len(), "fan-out complete");
        replies
    }
}

fn codes(entries: &[Entry]) -> Vec<u16> {
    entries.iter().map(|e| e.code).collect()
}

/// Nothing to address: `Ok` with an empty response list.
fn empty_batch() -> Outcome {
    Outcome::ok(envelope(&[], Map::new()))
}
