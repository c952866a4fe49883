//! Addresses of the agent endpoints on edge nodes.

use anchor_state::Node;

/// Port agents listen on unless configured otherwise.
pub const DEFAULT_AGENT_PORT: u16 = 48098;

const MANAGEMENT_PATH: &str = "/api/v1/management";
const WATCH_PATH: &str = "/api/v1/notification/apps/watch";

/// Builds agent URLs for a fixed agent port.
#[derive(Debug, Clone, Copy)]
pub struct Agents {
    port: u16,
}

impl Default for Agents {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_PORT)
    }
}

impl Agents {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://<ip>:<port>/api/v1/management<suffix>`
    pub fn management(&self, node: &Node, suffix: &str) -> String {
        format!("http://{}:{}{MANAGEMENT_PATH}{suffix}", node.ip, self.port)
    }

    /// Management URLs for each node, in node order.
    pub fn management_all(&self, nodes: &[Node], suffix: &str) -> Vec<String> {
        nodes.iter().map(|n| self.management(n, suffix)).collect()
    }

    pub fn unregister(&self, node: &Node) -> String {
        self.management(node, "/unregister")
    }

    pub fn watch(&self, node: &Node) -> String {
        format!("http://{}:{}{WATCH_PATH}", node.ip, self.port)
    }
}
