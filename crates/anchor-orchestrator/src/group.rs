//! Group manager: named node sets.

use std::sync::Arc;

use anchor_state::{Group, Node, NodeId, StateStore};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::{AnchorError, AnchorResult};
use crate::node::parse_body;
use crate::notification::NotificationController;
use crate::result::Outcome;

#[derive(Debug, Deserialize)]
struct CreateRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MembershipRequest {
    nodes: Vec<NodeId>,
}

pub struct GroupManager {
    state: StateStore,
    notification: Arc<NotificationController>,
}

impl GroupManager {
    pub fn new(state: StateStore, notification: Arc<NotificationController>) -> Self {
        Self {
            state,
            notification,
        }
    }

    /// Create an empty group from `{name}`; answers `{"id"}`.
    pub fn create(&self, body: &[u8]) -> AnchorResult<Outcome> {
        let request: CreateRequest = parse_body(body, "group")?;
        if request.name.trim().is_empty() {
            return Err(AnchorError::InvalidJson("group name is empty".into()));
        }
        let group = self.state.create_group(&request.name)?;
        info!(group_id = %group.id, name = %group.name, "group created");
        Ok(Outcome::id(&group.id))
    }

    pub fn get(&self, group_id: &str) -> AnchorResult<Group> {
        Ok(self.state.get_group(group_id)?)
    }

    pub fn list(&self) -> AnchorResult<Vec<Group>> {
        Ok(self.state.list_groups()?)
    }

    pub fn members(&self, group_id: &str) -> AnchorResult<Vec<Node>> {
        Ok(self.state.group_members(group_id)?)
    }

    /// Delete a group. Its nodes stay registered.
    pub fn delete(&self, group_id: &str) -> AnchorResult<Outcome> {
        self.state.delete_group(group_id)?;
        info!(%group_id, "group deleted");
        Ok(Outcome::id(group_id))
    }

    /// Add `{nodes: [...]}` to the group. Every node must exist; nothing is
    /// added otherwise.
    pub fn join(&self, group_id: &str, body: &[u8]) -> AnchorResult<Outcome> {
        let request: MembershipRequest = parse_body(body, "group membership")?;
        self.state.get_group(group_id)?;
        for node_id in &request.nodes {
            self.state.get_node(node_id)?;
        }

        let mut group = None;
        for node_id in &request.nodes {
            group = Some(self.state.add_group_member(group_id, node_id)?);
        }
        let group = match group {
            Some(group) => group,
            None => self.state.get_group(group_id)?,
        };
        info!(%group_id, joined = request.nodes.len(), members = group.members.len(), "nodes joined group");
        self.notification.schedule_reconcile();
        Ok(membership(&group))
    }

    /// Remove `{nodes: [...]}` from the group; non-members are ignored.
    pub fn leave(&self, group_id: &str, body: &[u8]) -> AnchorResult<Outcome> {
        let request: MembershipRequest = parse_body(body, "group membership")?;
        let mut group = self.state.get_group(group_id)?;
        for node_id in &request.nodes {
            group = self.state.remove_group_member(group_id, node_id)?;
        }
        info!(%group_id, left = request.nodes.len(), members = group.members.len(), "nodes left group");
        self.notification.schedule_reconcile();
        Ok(membership(&group))
    }
}

fn membership(group: &Group) -> Outcome {
    Outcome::ok(json!({ "id": group.id, "members": group.members }))
}
