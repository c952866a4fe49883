//! Search: evaluate a [`QueryFilter`] against the store.
//!
//! Node search starts from every node, or from a group's members when
//! `groupId` is given, then narrows by `nodeId`, by holders of `appId`, and
//! by holders of any app whose descriptor names `imageName`. A named group,
//! node or app that does not exist is `NotFound`; an image nobody uses just
//! matches nothing.

use anchor_state::{App, Node, StateStore, set_insert};

use crate::error::AnchorResult;
use crate::filter::QueryFilter;

#[derive(Clone)]
pub struct Search {
    state: StateStore,
}

impl Search {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Nodes matching `filter`, in group join order or store order.
    pub fn nodes(&self, filter: &QueryFilter) -> AnchorResult<Vec<Node>> {
        let mut nodes = match &filter.group_id {
            Some(group_id) => self.state.group_members(group_id)?,
            None => self.state.list_nodes()?,
        };

        if let Some(node_id) = &filter.node_id {
            self.state.get_node(node_id)?;
            nodes.retain(|n| &n.id == node_id);
        }

        if let Some(app_id) = &filter.app_id {
            self.state.get_app(app_id)?;
            nodes.retain(|n| n.holds_app(app_id));
        }

        if let Some(image) = &filter.image_name {
            let apps = self.state.list_apps_by_image(image)?;
            nodes.retain(|n| apps.iter().any(|a| n.holds_app(&a.id)));
        }

        Ok(nodes)
    }

    /// Apps installed on the nodes matching `filter`, restricted by
    /// `appId` and `imageName`.
    pub fn apps(&self, filter: &QueryFilter) -> AnchorResult<Vec<App>> {
        let mut app_ids = Vec::new();
        for node in self.nodes(filter)? {
            for app_id in &node.apps {
                set_insert(&mut app_ids, app_id);
            }
        }

        let mut apps = Vec::with_capacity(app_ids.len());
        for app_id in &app_ids {
            if filter.app_id.as_ref().is_some_and(|wanted| wanted != app_id) {
                continue;
            }
            match self.state.get_app(app_id) {
                Ok(app) => apps.push(app),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(image) = &filter.image_name {
            apps.retain(|a| a.uses_image(image));
        }
        Ok(apps)
    }
}
