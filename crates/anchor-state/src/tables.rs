//! redb table definitions for the Anchor state store.
//!
//! Each table uses `&str` keys (the entity id) and `&[u8]` values
//! (JSON-serialized domain types).

use redb::TableDefinition;

/// Edge nodes keyed by node id.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Node groups keyed by group id.
pub const GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("groups");

/// Installed apps keyed by app id.
pub const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");

/// Notification subscribers keyed by subscriber id.
pub const SUBSCRIBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("subscribers");

/// App lifecycle events keyed by the filter-derived event id.
pub const APP_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("app_events");

/// Node lifecycle events keyed by node id.
pub const NODE_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_events");
