//! anchor-orchestrator: the Anchor control plane's controllers.
//!
//! Every operation takes its inputs (path ids, query multimap, raw body),
//! reads the store, talks to agents through a [`Transport`], writes the
//! store back and answers one [`Outcome`]: a three-valued status plus a
//! JSON body. Input and lookup failures short-circuit as [`AnchorError`]
//! before anything is sent.
//!
//! [`Anchor`] wires the controllers together around one store, one
//! transport and one liveness scheduler.

pub mod agent;
pub mod app;
pub mod deploy;
pub mod error;
pub mod filter;
pub mod group;
pub mod node;
pub mod notification;
pub mod result;
pub mod search;

use std::sync::Arc;

use anchor_client::Transport;
use anchor_health::{BoxFuture, LivenessConfig, LivenessScheduler, StatusCallback};
use anchor_state::{NodeId, NodeStatus, StateStore};
use tracing::info;

pub use agent::{Agents, DEFAULT_AGENT_PORT};
pub use app::AppManager;
pub use deploy::{GroupDeployment, NodeDeployment, Verb};
pub use error::{AnchorError, AnchorResult};
pub use filter::QueryFilter;
pub use group::GroupManager;
pub use node::NodeManager;
pub use notification::NotificationController;
pub use result::{Outcome, Status};
pub use search::Search;

/// Knobs the controllers need beyond store and transport.
#[derive(Debug, Clone)]
pub struct AnchorOptions {
    pub agent_port: u16,
    pub liveness: LivenessConfig,
}

impl Default for AnchorOptions {
    fn default() -> Self {
        Self {
            agent_port: DEFAULT_AGENT_PORT,
            liveness: LivenessConfig::default(),
        }
    }
}

/// The assembled control plane.
pub struct Anchor {
    pub state: StateStore,
    pub search: Search,
    pub nodes: NodeManager,
    pub groups: GroupManager,
    pub apps: AppManager,
    pub node_apps: NodeDeployment,
    pub group_apps: GroupDeployment,
    pub notification: Arc<NotificationController>,
    pub liveness: Arc<LivenessScheduler>,
}

impl Anchor {
    pub fn new(state: StateStore, transport: Arc<dyn Transport>, options: AnchorOptions) -> Self {
        let agents = Agents::new(options.agent_port);
        let notification = Arc::new(NotificationController::new(
            state.clone(),
            Arc::clone(&transport),
            agents,
        ));

        // Liveness transitions become node events.
        let events = Arc::clone(&notification);
        let on_status_change: StatusCallback =
            Arc::new(move |node_id: NodeId, status: NodeStatus| -> BoxFuture {
                let events = Arc::clone(&events);
                Box::pin(async move { events.emit_node_status(&node_id, status) })
            });
        let liveness = Arc::new(
            LivenessScheduler::new(state.clone(), options.liveness).with_callback(on_status_change),
        );

        Self {
            search: Search::new(state.clone()),
            nodes: NodeManager::new(
                state.clone(),
                Arc::clone(&transport),
                agents,
                Arc::clone(&liveness),
                Arc::clone(&notification),
            ),
            groups: GroupManager::new(state.clone(), Arc::clone(&notification)),
            apps: AppManager::new(state.clone()),
            node_apps: NodeDeployment::new(
                state.clone(),
                Arc::clone(&transport),
                agents,
                Arc::clone(&notification),
            ),
            group_apps: GroupDeployment::new(
                state.clone(),
                transport,
                agents,
                Arc::clone(&notification),
            ),
            notification,
            liveness,
            state,
        }
    }

    /// Stop every watchdog.
    pub async fn shutdown(&self) {
        self.liveness.stop_all().await;
        info!("anchor controllers stopped");
    }
}
