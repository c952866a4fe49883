//! App manager: the catalogue of apps known to the fleet.
//!
//! Apps are written by the deployment controllers; this is the read side.

use anchor_state::{App, Node, StateStore};

use crate::error::AnchorResult;

pub struct AppManager {
    state: StateStore,
}

impl AppManager {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    pub fn get(&self, app_id: &str) -> AnchorResult<App> {
        Ok(self.state.get_app(app_id)?)
    }

    pub fn list(&self) -> AnchorResult<Vec<App>> {
        Ok(self.state.list_apps()?)
    }

    /// Apps whose descriptor names `image`.
    pub fn list_by_image(&self, image: &str) -> AnchorResult<Vec<App>> {
        Ok(self.state.list_apps_by_image(image)?)
    }

    /// Nodes the app is installed on.
    pub fn holders(&self, app_id: &str) -> AnchorResult<Vec<Node>> {
        self.state.get_app(app_id)?;
        Ok(self.state.list_nodes_holding_app(app_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_state::{NodeConfig, NodeStatus};

    #[test]
    fn catalogue_reads() {
        let state = StateStore::open_in_memory().unwrap();
        state.add_app("A1", "services:\n  db:\n    image: redis\n").unwrap();
        state.add_app("A2", "images: [nginx]").unwrap();
        state
            .add_node(
                "N1",
                "10.0.0.1",
                NodeStatus::Connected,
                NodeConfig::default(),
                vec!["A1".into()],
            )
            .unwrap();
        let apps = AppManager::new(state);

        assert_eq!(apps.list().unwrap().len(), 2);
        assert_eq!(apps.get("A1").unwrap().images, vec!["redis"]);
        assert_eq!(apps.list_by_image("nginx").unwrap()[0].id, "A2");
        assert_eq!(apps.holders("A1").unwrap()[0].id, "N1");
        assert!(apps.holders("A2").unwrap().is_empty());
        assert!(apps.get("A9").unwrap_err().is_not_found());
    }
}
