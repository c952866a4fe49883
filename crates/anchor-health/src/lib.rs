//! anchor-health: node liveness for the Anchor control plane.
//!
//! Agents ping the Anchor periodically, announcing the interval until
//! their next ping. Each ping (re)arms a single-shot watchdog for that
//! node; if the watchdog expires before the next ping, the node is marked
//! `disconnected` in the state store.
//!
//! # Architecture
//!
//! ```text
//! LivenessScheduler
//!   ├── Mutex<TimerTable>: node_id → Watchdog { generation, reset_tx }
//!   ├── Per-node watchdog task
//!   │   ├── sleep((interval + max_network_latency) × unit)
//!   │   ├── reset_rx → exit quietly (superseded or cancelled)
//!   │   └── expiry → under the lock: still our generation? → disconnected
//!   └── Optional StatusCallback on connected ↔ disconnected transitions
//! ```
//!
//! A watchdog is not a tick loop: a node that keeps pinging costs one
//! timer, and a missed window yields exactly one disconnect transition.

pub mod scheduler;

pub use scheduler::{BoxFuture, LivenessConfig, LivenessScheduler, PingOutcome, StatusCallback};
