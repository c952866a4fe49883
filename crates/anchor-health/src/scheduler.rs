//! Liveness scheduler: per-node single-shot watchdogs.
//!
//! The timer table is the only shared mutable state. Every mutation of it
//! (arm, reset, cancel, drop-on-expiry) happens under one mutex, and the
//! status write that accompanies a transition happens under the same lock.
//! A watchdog that wakes up after it was superseded finds a different
//! generation (or no slot at all) in the table and does nothing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use anchor_state::{NodeId, NodeStatus, StateResult, StateStore};

/// Callback invoked after a node's liveness status changes.
pub type StatusCallback = Arc<dyn Fn(NodeId, NodeStatus) -> BoxFuture + Send + Sync>;

/// Future returned by a [`StatusCallback`].
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Timing parameters for watchdogs.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Length of one interval unit (agents announce intervals in minutes).
    pub unit: Duration,
    /// Grace added to every announced interval, in units.
    pub max_network_latency: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(60),
            max_network_latency: 1,
        }
    }
}

impl LivenessConfig {
    /// How long a node may stay silent after announcing `interval`.
    pub fn window(&self, interval: u64) -> Duration {
        let units = interval.saturating_add(self.max_network_latency);
        self.unit
            .saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
    }
}

/// What a ping did to the node's watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// No watchdog was running; one was armed. Status unchanged.
    Armed,
    /// A live watchdog was reset and re-armed.
    Reset,
    /// The previous watchdog had fired; the node is `connected` again.
    Reconnected,
}

/// A live watchdog's slot in the timer table.
struct Watchdog {
    generation: u64,
    reset_tx: mpsc::Sender<()>,
}

#[derive(Default)]
struct TimerTable {
    next_generation: u64,
    slots: HashMap<NodeId, Watchdog>,
}

/// Arms, resets and fires per-node liveness watchdogs.
pub struct LivenessScheduler {
    state: StateStore,
    config: LivenessConfig,
    timers: Arc<Mutex<TimerTable>>,
    on_status_change: Option<StatusCallback>,
}

impl LivenessScheduler {
    pub fn new(state: StateStore, config: LivenessConfig) -> Self {
        Self {
            state,
            config,
            timers: Arc::new(Mutex::new(TimerTable::default())),
            on_status_change: None,
        }
    }

    /// Set a callback for liveness transitions.
    pub fn with_callback(mut self, callback: StatusCallback) -> Self {
        self.on_status_change = Some(callback);
        self
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Record a ping from `node_id` announcing its next ping within `interval` units.
    ///
    /// Fails with `NotFound` if the node is not registered.
    pub async fn ping(&self, node_id: &str, interval: u64) -> StateResult<PingOutcome> {
        let window = self.config.window(interval);
        let node = self.state.get_node(node_id)?;
        let mut table = self.timers.lock().await;

        let outcome = match table.slots.remove(node_id) {
            Some(previous) => {
                // Dropping the sender alone would also wake the old task.
                let _ = previous.reset_tx.try_send(());
                PingOutcome::Reset
            }
            None => {
                if node.status == NodeStatus::Disconnected {
                    self.state
                        .update_node_status(node_id, NodeStatus::Connected)?;
                    info!(%node_id, "node reconnected");
                    PingOutcome::Reconnected
                } else {
                    PingOutcome::Armed
                }
            }
        };

        table.next_generation += 1;
        let generation = table.next_generation;
        let (reset_tx, reset_rx) = mpsc::channel(1);
        table.slots.insert(
            node_id.to_string(),
            Watchdog {
                generation,
                reset_tx,
            },
        );
        drop(table);

        tokio::spawn(run_watchdog(
            node_id.to_string(),
            generation,
            window,
            reset_rx,
            Arc::clone(&self.timers),
            self.state.clone(),
            self.on_status_change.clone(),
        ));
        debug!(%node_id, interval, ?window, ?outcome, "watchdog armed");

        if outcome == PingOutcome::Reconnected {
            if let Some(ref cb) = self.on_status_change {
                cb(node_id.to_string(), NodeStatus::Connected).await;
            }
        }
        Ok(outcome)
    }

    /// Stop a node's watchdog without a status change. Returns true if one was armed.
    pub async fn cancel(&self, node_id: &str) -> bool {
        let mut table = self.timers.lock().await;
        match table.slots.remove(node_id) {
            Some(slot) => {
                let _ = slot.reset_tx.try_send(());
                debug!(%node_id, "watchdog cancelled");
                true
            }
            None => false,
        }
    }

    /// Stop every watchdog (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut table = self.timers.lock().await;
        for (node_id, slot) in table.slots.drain() {
            let _ = slot.reset_tx.try_send(());
            debug!(%node_id, "watchdog stopped");
        }
        info!("all watchdogs stopped");
    }

    /// Whether a watchdog is currently armed for `node_id`.
    pub async fn is_armed(&self, node_id: &str) -> bool {
        self.timers.lock().await.slots.contains_key(node_id)
    }

    /// Ids of nodes with an armed watchdog.
    pub async fn armed_nodes(&self) -> Vec<NodeId> {
        self.timers.lock().await.slots.keys().cloned().collect()
    }
}

/// Wait for expiry or reset; on expiry, mark the node disconnected if this
/// watchdog still owns the node's slot.
async fn run_watchdog(
    node_id: NodeId,
    generation: u64,
    window: Duration,
    mut reset_rx: mpsc::Receiver<()>,
    timers: Arc<Mutex<TimerTable>>,
    state: StateStore,
    callback: Option<StatusCallback>,
) {
    tokio::select! {
        _ = tokio::time::sleep(window) => {
            let mut table = timers.lock().await;
            let owned = table
                .slots
                .get(&node_id)
                .is_some_and(|slot| slot.generation == generation);
            if !owned {
                debug!(%node_id, generation, "watchdog superseded before firing");
                return;
            }
            table.slots.remove(&node_id);

            let result = state.update_node_status(&node_id, NodeStatus::Disconnected);
            drop(table);

            match result {
                Ok(_) => {
                    warn!(%node_id, ?window, "missed ping window, node disconnected");
                    if let Some(cb) = callback {
                        cb(node_id, NodeStatus::Disconnected).await;
                    }
                }
                Err(e) => {
                    warn!(%node_id, error = %e, "failed to mark node disconnected");
                }
            }
        }
        _ = reset_rx.recv() => {
            debug!(%node_id, generation, "watchdog reset");
        }
    }
}
