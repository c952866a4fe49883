//! anchor-state: entity store for the Anchor control plane.
//!
//! Backed by [redb](https://docs.rs/redb), persists the registry of edge
//! nodes, node groups, installed apps, notification subscribers and the
//! per-event subscriber lists.
//!
//! # Architecture
//!
//! All entities are JSON-serialized into redb's `&[u8]` value columns and
//! keyed by their opaque string id. Read-modify-write operations (adding an
//! app to a node, joining a group, pulling a subscriber out of an event) run
//! inside a single write transaction, so each one is atomic per document.
//! There is no cross-document atomicity.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod descriptor;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
