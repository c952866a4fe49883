//! App lifecycle on agents: one node at a time or fanned out over a group.
//!
//! Both controllers speak the same verb table to the agent's management API
//! and write the same store reconciliation back on success:
//!
//! | Verb | Method | Suffix |
//! |---|---|---|
//! | Deploy | POST | `/apps/deploy` |
//! | GetApps | GET | `/apps` |
//! | GetApp | GET | `/apps/<appId>` |
//! | UpdateInfo | POST | `/apps/<appId>` |
//! | Delete | DELETE | `/apps/<appId>` |
//! | Update | POST | `/apps/<appId>/update` |
//! | Start | POST | `/apps/<appId>/start` |
//! | Stop | POST | `/apps/<appId>/stop` |

pub mod group;
pub mod node;

use anchor_client::{Method, Reply};
use anchor_state::{AppId, StateStore};
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{AnchorError, AnchorResult};
use crate::result::parse_object;

pub use group::GroupDeployment;
pub use node::NodeDeployment;

/// An app lifecycle operation on an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Deploy,
    GetApps,
    GetApp,
    UpdateInfo,
    Delete,
    Update,
    Start,
    Stop,
}

impl Verb {
    pub fn method(self) -> Method {
        match self {
            Verb::GetApps | Verb::GetApp => Method::GET,
            Verb::Delete => Method::DELETE,
            Verb::Deploy | Verb::UpdateInfo | Verb::Update | Verb::Start | Verb::Stop => {
                Method::POST
            }
        }
    }

    /// Path below the agent's management prefix.
    pub fn suffix(self, app_id: &str) -> String {
        match self {
            Verb::Deploy => "/apps/deploy".to_string(),
            Verb::GetApps => "/apps".to_string(),
            Verb::GetApp | Verb::UpdateInfo | Verb::Delete => format!("/apps/{app_id}"),
            Verb::Update => format!("/apps/{app_id}/update"),
            Verb::Start => format!("/apps/{app_id}/start"),
            Verb::Stop => format!("/apps/{app_id}/stop"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Deploy => "deploy",
            Verb::GetApps => "get-apps",
            Verb::GetApp => "get-app",
            Verb::UpdateInfo => "update-info",
            Verb::Delete => "delete",
            Verb::Update => "update",
            Verb::Start => "start",
            Verb::Stop => "stop",
        }
    }

    /// Whether the verb only addresses nodes already holding the app.
    pub fn needs_app(self) -> bool {
        !matches!(self, Verb::Deploy | Verb::GetApps)
    }

    /// The verbs that change an installed app without store bookkeeping.
    pub(crate) fn is_control(self) -> bool {
        matches!(self, Verb::UpdateInfo | Verb::Update | Verb::Start | Verb::Stop)
    }
}

/// Treat an empty request body as no body.
pub(crate) fn optional_body(body: &[u8]) -> Option<&[u8]> {
    (!body.is_empty()).then_some(body)
}

/// `(id, description)` from a successful deploy reply.
///
/// A non-string description is kept in its JSON text form.
pub(crate) fn installed_app(reply: &Reply) -> Option<(AppId, String)> {
    let mut map = parse_object(&reply.body)?;
    let id = match map.remove("id") {
        Some(Value::String(id)) if !id.is_empty() => id,
        _ => return None,
    };
    let description = match map.remove("description") {
        Some(Value::String(text)) => text,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Some((id, description))
}

/// Write the app and the node's link to it.
///
/// If the link cannot be written, the app record is removed again unless
/// another node already references it.
pub(crate) fn record_install(
    state: &StateStore,
    node_id: &str,
    app_id: &str,
    description: &str,
) -> AnchorResult<()> {
    state
        .add_app(app_id, description)
        .map_err(|e| AnchorError::internal(&format!("record app {app_id}"), e))?;

    if let Err(e) = state.add_node_app(node_id, app_id) {
        error!(%node_id, %app_id, error = %e, "app installed but not linked to node");
        if let Err(cleanup) = release_if_orphaned(state, app_id) {
            error!(%app_id, error = %cleanup, "orphaned app not removed");
        }
        return Err(AnchorError::internal(
            &format!("link app {app_id} to node {node_id}"),
            e,
        ));
    }
    Ok(())
}

/// Drop the node's link to an app that the agent removed.
pub(crate) fn record_removal(state: &StateStore, node_id: &str, app_id: &str) -> AnchorResult<()> {
    state.remove_node_app(node_id, app_id).map_err(|e| {
        error!(%node_id, %app_id, error = %e, "app removed but node still lists it");
        AnchorError::internal(&format!("unlink app {app_id} from node {node_id}"), e)
    })?;
    Ok(())
}

/// Delete the app record if no node references it. Returns whether it was deleted.
pub(crate) fn release_if_orphaned(state: &StateStore, app_id: &str) -> AnchorResult<bool> {
    let holders = state
        .list_nodes_holding_app(app_id)
        .map_err(|e| AnchorError::internal(&format!("find holders of app {app_id}"), e))?;
    if !holders.is_empty() {
        return Ok(false);
    }
    match state.delete_app(app_id) {
        Ok(()) => {
            debug!(%app_id, "app no longer installed anywhere, removed");
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(AnchorError::internal(&format!("delete app {app_id}"), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_state::{NodeConfig, NodeStatus};

    #[test]
    fn verb_table() {
        assert_eq!(Verb::Deploy.method(), Method::POST);
        assert_eq!(Verb::Deploy.suffix("ignored"), "/apps/deploy");
        assert_eq!(Verb::GetApps.suffix(""), "/apps");
        assert_eq!(Verb::GetApp.method(), Method::GET);
        assert_eq!(Verb::UpdateInfo.method(), Method::POST);
        assert_eq!(Verb::Delete.method(), Method::DELETE);
        assert_eq!(Verb::Delete.suffix("A1"), "/apps/A1");
        assert_eq!(Verb::Update.suffix("A1"), "/apps/A1/update");
        assert_eq!(Verb::Start.suffix("A1"), "/apps/A1/start");
        assert_eq!(Verb::Stop.suffix("A1"), "/apps/A1/stop");
        assert!(!Verb::GetApps.needs_app());
        assert!(Verb::Stop.needs_app());
    }

    #[test]
    fn installed_app_reads_id_and_description() {
        let reply = Reply::new(200, r#"{"id":"A1","description":"images: [redis]"}"#);
        assert_eq!(
            installed_app(&reply),
            Some(("A1".to_string(), "images: [redis]".to_string()))
        );

        let reply = Reply::new(200, r#"{"id":"A1","description":{"images":["redis"]}}"#);
        assert_eq!(installed_app(&reply).unwrap().1, r#"{"images":["redis"]}"#);

        assert_eq!(installed_app(&Reply::new(200, r#"{"id":""}"#)), None);
        assert_eq!(installed_app(&Reply::new(200, "ok")), None);
    }

    #[test]
    fn failed_link_removes_fresh_app() {
        let state = StateStore::open_in_memory().unwrap();

        let err = record_install(&state, "ghost", "A1", "{}").unwrap_err();
        assert!(matches!(err, AnchorError::Internal(_)));
        assert!(state.get_app("A1").unwrap_err().is_not_found());
    }

    #[test]
    fn failed_link_keeps_shared_app() {
        let state = StateStore::open_in_memory().unwrap();
        state
            .add_node(
                "N1",
                "10.0.0.1",
                NodeStatus::Connected,
                NodeConfig::default(),
                vec!["A1".into()],
            )
            .unwrap();

        assert!(record_install(&state, "ghost", "A1", "{}").is_err());
        assert!(state.get_app("A1").is_ok());
    }

    #[test]
    fn orphan_release() {
        let state = StateStore::open_in_memory().unwrap();
        state.add_app("A1", "{}").unwrap();
        assert!(release_if_orphaned(&state, "A1").unwrap());
        assert!(!release_if_orphaned(&state, "A1").unwrap());
    }
}
