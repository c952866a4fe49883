//! StateStore: redb-backed persistence for the Anchor control plane.
//!
//! Provides typed CRUD operations over nodes, groups, apps, subscribers and
//! events. All values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::descriptor;
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

const MAX_KEY_LEN: usize = 256;

/// Reject keys that cannot be valid entity ids.
fn check_key(key: &str) -> StateResult<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/');
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidKey(key.to_string()))
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Connection))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Connection))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Connection))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [NODES, GROUPS, APPS, SUBSCRIBERS, APP_EVENTS, NODE_EVENTS] {
            txn.open_table(table).map_err(map_err!(Operation))?;
        }
        txn.commit().map_err(map_err!(Connection))?;
        Ok(())
    }

    // ── Generic document access ────────────────────────────────────

    fn fetch<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        check_key(key)?;
        let txn = self.db.begin_read().map_err(map_err!(Connection))?;
        let table = txn.open_table(table).map_err(map_err!(Operation))?;
        match table.get(key).map_err(map_err!(Operation))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Operation))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn fetch_required<T: DeserializeOwned>(
        &self,
        table: Table,
        key: &str,
        what: &str,
    ) -> StateResult<T> {
        self.fetch(table, key)?
            .ok_or_else(|| StateError::NotFound(format!("{what} {key}")))
    }

    fn scan<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Connection))?;
        let table = txn.open_table(table).map_err(map_err!(Operation))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Operation))? {
            let (_, value) = entry.map_err(map_err!(Operation))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Operation))?);
        }
        Ok(results)
    }

    fn store<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        check_key(key)?;
        let bytes = serde_json::to_vec(value).map_err(map_err!(Operation))?;
        let txn = self.db.begin_write().map_err(map_err!(Connection))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Operation))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Operation))?;
        }
        txn.commit().map_err(map_err!(Connection))?;
        Ok(())
    }

    /// Insert `value` only if `key` is free; `Duplicate` otherwise.
    fn insert_new<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        check_key(key)?;
        let bytes = serde_json::to_vec(value).map_err(map_err!(Operation))?;
        let txn = self.db.begin_write().map_err(map_err!(Connection))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Operation))?;
            if table.get(key).map_err(map_err!(Operation))?.is_some() {
                return Err(StateError::Duplicate(key.to_string()));
            }
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Operation))?;
        }
        txn.commit().map_err(map_err!(Connection))?;
        Ok(())
    }

    fn remove(&self, table: Table, key: &str, what: &str) -> StateResult<()> {
        check_key(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Connection))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Operation))?;
            existed = table.remove(key).map_err(map_err!(Operation))?.is_some();
        }
        txn.commit().map_err(map_err!(Connection))?;
        if existed {
            Ok(())
        } else {
            Err(StateError::NotFound(format!("{what} {key}")))
        }
    }

    /// Read-modify-write one document inside a single write transaction.
    ///
    /// `f` receives the current document (if any) and returns the document to
    /// write back. The written document is returned.
    fn update<T, F>(&self, table: Table, key: &str, f: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> StateResult<T>,
    {
        check_key(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Connection))?;
        let updated = {
            let mut table = txn.open_table(table).map_err(map_err!(Operation))?;
            let current: Option<T> = match table.get(key).map_err(map_err!(Operation))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Operation))?)
                }
                None => None,
            };
            let updated = f(current)?;
            let bytes = serde_json::to_vec(&updated).map_err(map_err!(Operation))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Operation))?;
            updated
        };
        txn.commit().map_err(map_err!(Connection))?;
        Ok(updated)
    }

    /// Like [`update`](Self::update), but fails with `NotFound` on a missing document.
    fn modify<T, F>(&self, table: Table, key: &str, what: &str, f: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        self.update(table, key, |current: Option<T>| {
            let mut doc = current.ok_or_else(|| StateError::NotFound(format!("{what} {key}")))?;
            f(&mut doc);
            Ok(doc)
        })
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert a new node. Fails with `Duplicate` if the id is taken.
    pub fn add_node(
        &self,
        id: &str,
        ip: &str,
        status: NodeStatus,
        config: NodeConfig,
        apps: Vec<AppId>,
    ) -> StateResult<Node> {
        let mut unique_apps = Vec::with_capacity(apps.len());
        for app in &apps {
            set_insert(&mut unique_apps, app);
        }
        let node = Node {
            id: id.to_string(),
            ip: ip.to_string(),
            status,
            apps: unique_apps,
            config,
        };
        self.insert_new(NODES, id, &node)?;
        debug!(node_id = %id, %ip, "node stored");
        Ok(node)
    }

    /// Get a node by id.
    pub fn get_node(&self, id: &str) -> StateResult<Node> {
        self.fetch_required(NODES, id, "node")
    }

    /// List all nodes.
    pub fn list_nodes(&self) -> StateResult<Vec<Node>> {
        self.scan(NODES)
    }

    /// List nodes with the given status.
    pub fn list_nodes_with_status(&self, status: NodeStatus) -> StateResult<Vec<Node>> {
        Ok(self
            .list_nodes()?
            .into_iter()
            .filter(|n| n.status == status)
            .collect())
    }

    /// Get a node only if it holds `app_id`; `NotFound` otherwise.
    pub fn get_node_by_app(&self, node_id: &str, app_id: &str) -> StateResult<Node> {
        let node = self.get_node(node_id)?;
        if node.holds_app(app_id) {
            Ok(node)
        } else {
            Err(StateError::NotFound(format!("app {app_id} on node {node_id}")))
        }
    }

    /// Get the node registered with `ip`.
    pub fn get_node_by_ip(&self, ip: &str) -> StateResult<Node> {
        self.list_nodes()?
            .into_iter()
            .find(|n| n.ip == ip)
            .ok_or_else(|| StateError::NotFound(format!("node with ip {ip}")))
    }

    /// List every node that holds `app_id`.
    pub fn list_nodes_holding_app(&self, app_id: &str) -> StateResult<Vec<Node>> {
        Ok(self
            .list_nodes()?
            .into_iter()
            .filter(|n| n.holds_app(app_id))
            .collect())
    }

    /// Set a node's liveness status.
    pub fn update_node_status(&self, id: &str, status: NodeStatus) -> StateResult<Node> {
        let node = self.modify(NODES, id, "node", |n: &mut Node| n.status = status)?;
        debug!(node_id = %id, %status, "node status updated");
        Ok(node)
    }

    /// Replace a node's configuration.
    pub fn update_node_config(&self, id: &str, config: NodeConfig) -> StateResult<Node> {
        self.modify(NODES, id, "node", |n: &mut Node| n.config = config)
    }

    /// Refresh address, configuration and status of a re-registering node.
    pub fn refresh_node(
        &self,
        id: &str,
        ip: &str,
        config: NodeConfig,
        status: NodeStatus,
    ) -> StateResult<Node> {
        self.modify(NODES, id, "node", |n: &mut Node| {
            n.ip = ip.to_string();
            n.config = config;
            n.status = status;
        })
    }

    /// Record that `app_id` is installed on a node (idempotent).
    pub fn add_node_app(&self, node_id: &str, app_id: &str) -> StateResult<Node> {
        check_key(app_id)?;
        self.modify(NODES, node_id, "node", |n: &mut Node| {
            set_insert(&mut n.apps, app_id);
        })
    }

    /// Record that `app_id` is no longer installed on a node (idempotent).
    pub fn remove_node_app(&self, node_id: &str, app_id: &str) -> StateResult<Node> {
        self.modify(NODES, node_id, "node", |n: &mut Node| {
            set_remove(&mut n.apps, app_id);
        })
    }

    /// Delete a node by id.
    pub fn delete_node(&self, id: &str) -> StateResult<()> {
        self.remove(NODES, id, "node")?;
        debug!(node_id = %id, "node deleted");
        Ok(())
    }

    // ── Groups ─────────────────────────────────────────────────────

    /// Create an empty group with a fresh id.
    pub fn create_group(&self, name: &str) -> StateResult<Group> {
        let group = Group {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            members: Vec::new(),
        };
        self.insert_new(GROUPS, &group.id, &group)?;
        debug!(group_id = %group.id, %name, "group created");
        Ok(group)
    }

    /// Get a group by id.
    pub fn get_group(&self, id: &str) -> StateResult<Group> {
        self.fetch_required(GROUPS, id, "group")
    }

    /// List all groups.
    pub fn list_groups(&self) -> StateResult<Vec<Group>> {
        self.scan(GROUPS)
    }

    /// Add a node to a group (set semantics).
    pub fn add_group_member(&self, group_id: &str, node_id: &str) -> StateResult<Group> {
        check_key(node_id)?;
        self.modify(GROUPS, group_id, "group", |g: &mut Group| {
            set_insert(&mut g.members, node_id);
        })
    }

    /// Remove a node from a group (set semantics).
    pub fn remove_group_member(&self, group_id: &str, node_id: &str) -> StateResult<Group> {
        self.modify(GROUPS, group_id, "group", |g: &mut Group| {
            set_remove(&mut g.members, node_id);
        })
    }

    /// Pull a node out of every group it belongs to. Returns the affected group ids.
    pub fn remove_node_from_groups(&self, node_id: &str) -> StateResult<Vec<GroupId>> {
        let mut affected = Vec::new();
        for group in self.list_groups()? {
            if group.members.iter().any(|m| m == node_id) {
                self.remove_group_member(&group.id, node_id)?;
                affected.push(group.id);
            }
        }
        Ok(affected)
    }

    /// Delete a group. Member nodes are untouched.
    pub fn delete_group(&self, id: &str) -> StateResult<()> {
        self.remove(GROUPS, id, "group")?;
        debug!(group_id = %id, "group deleted");
        Ok(())
    }

    /// Resolve a group's members to node records, in join order.
    ///
    /// Member ids whose node no longer exists are skipped.
    pub fn group_members(&self, group_id: &str) -> StateResult<Vec<Node>> {
        let group = self.get_group(group_id)?;
        let mut nodes = Vec::with_capacity(group.members.len());
        for member in &group.members {
            match self.get_node(member) {
                Ok(node) => nodes.push(node),
                Err(StateError::NotFound(_)) => {
                    debug!(%group_id, node_id = %member, "skipping dangling group member");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(nodes)
    }

    /// Members of a group whose app set contains `app_id`, in join order.
    pub fn group_members_holding_app(
        &self,
        group_id: &str,
        app_id: &str,
    ) -> StateResult<Vec<Node>> {
        Ok(self
            .group_members(group_id)?
            .into_iter()
            .filter(|n| n.holds_app(app_id))
            .collect())
    }

    // ── Apps ───────────────────────────────────────────────────────

    /// Insert or refresh an app from its deployment descriptor.
    pub fn add_app(&self, id: &str, description: &str) -> StateResult<App> {
        let app = App {
            id: id.to_string(),
            images: descriptor::images(description),
            description: description.to_string(),
        };
        self.store(APPS, id, &app)?;
        debug!(app_id = %id, images = app.images.len(), "app stored");
        Ok(app)
    }

    /// Get an app by id.
    pub fn get_app(&self, id: &str) -> StateResult<App> {
        self.fetch_required(APPS, id, "app")
    }

    /// List all apps.
    pub fn list_apps(&self) -> StateResult<Vec<App>> {
        self.scan(APPS)
    }

    /// List apps whose descriptor names `image`.
    pub fn list_apps_by_image(&self, image: &str) -> StateResult<Vec<App>> {
        Ok(self
            .list_apps()?
            .into_iter()
            .filter(|a| a.uses_image(image))
            .collect())
    }

    /// Delete an app by id.
    pub fn delete_app(&self, id: &str) -> StateResult<()> {
        self.remove(APPS, id, "app")?;
        debug!(app_id = %id, "app deleted");
        Ok(())
    }

    // ── Subscribers ────────────────────────────────────────────────

    /// Insert or replace a subscriber.
    pub fn put_subscriber(&self, subscriber: &Subscriber) -> StateResult<()> {
        self.store(SUBSCRIBERS, &subscriber.id, subscriber)
    }

    /// Get a subscriber by id.
    pub fn get_subscriber(&self, id: &str) -> StateResult<Subscriber> {
        self.fetch_required(SUBSCRIBERS, id, "subscriber")
    }

    /// List all subscribers.
    pub fn list_subscribers(&self) -> StateResult<Vec<Subscriber>> {
        self.scan(SUBSCRIBERS)
    }

    /// Delete a subscriber by id.
    pub fn delete_subscriber(&self, id: &str) -> StateResult<()> {
        self.remove(SUBSCRIBERS, id, "subscriber")
    }

    // ── App events ─────────────────────────────────────────────────

    /// Insert or replace an app event.
    pub fn put_app_event(&self, event: &AppEvent) -> StateResult<()> {
        self.store(APP_EVENTS, &event.id, event)
    }

    /// Get an app event by id.
    pub fn get_app_event(&self, id: &str) -> StateResult<AppEvent> {
        self.fetch_required(APP_EVENTS, id, "app event")
    }

    /// Get an app event if it exists.
    pub fn find_app_event(&self, id: &str) -> StateResult<Option<AppEvent>> {
        self.fetch(APP_EVENTS, id)
    }

    /// List all app events.
    pub fn list_app_events(&self) -> StateResult<Vec<AppEvent>> {
        self.scan(APP_EVENTS)
    }

    /// Attach a subscriber to an app event, creating the event if needed,
    /// and set the event's watched node list.
    pub fn attach_app_event(
        &self,
        event_id: &str,
        subscriber_id: &str,
        nodes: Vec<NodeId>,
    ) -> StateResult<AppEvent> {
        self.update(APP_EVENTS, event_id, |current: Option<AppEvent>| {
            let mut event = current.unwrap_or_else(|| AppEvent {
                id: event_id.to_string(),
                ..AppEvent::default()
            });
            set_insert(&mut event.subscribers, subscriber_id);
            event.nodes = nodes;
            Ok(event)
        })
    }

    /// Atomically pull one subscriber out of an app event's subscriber list.
    ///
    /// Returns the event as written; the caller deletes it once empty.
    pub fn unregister_app_event(&self, event_id: &str, subscriber_id: &str) -> StateResult<AppEvent> {
        self.modify(APP_EVENTS, event_id, "app event", |e: &mut AppEvent| {
            set_remove(&mut e.subscribers, subscriber_id);
        })
    }

    /// Delete an app event by id.
    pub fn delete_app_event(&self, id: &str) -> StateResult<()> {
        self.remove(APP_EVENTS, id, "app event")
    }

    // ── Node events ────────────────────────────────────────────────

    /// Insert or replace a node event.
    pub fn put_node_event(&self, event: &NodeEvent) -> StateResult<()> {
        self.store(NODE_EVENTS, &event.id, event)
    }

    /// Get a node event by id.
    pub fn get_node_event(&self, id: &str) -> StateResult<NodeEvent> {
        self.fetch_required(NODE_EVENTS, id, "node event")
    }

    /// Get a node event if it exists.
    pub fn find_node_event(&self, id: &str) -> StateResult<Option<NodeEvent>> {
        self.fetch(NODE_EVENTS, id)
    }

    /// List all node events.
    pub fn list_node_events(&self) -> StateResult<Vec<NodeEvent>> {
        self.scan(NODE_EVENTS)
    }

    /// Attach a subscriber to a node event, creating the event if needed.
    pub fn attach_node_event(&self, event_id: &str, subscriber_id: &str) -> StateResult<NodeEvent> {
        self.update(NODE_EVENTS, event_id, |current: Option<NodeEvent>| {
            let mut event = current.unwrap_or_else(|| NodeEvent {
                id: event_id.to_string(),
                ..NodeEvent::default()
            });
            set_insert(&mut event.subscribers, subscriber_id);
            Ok(event)
        })
    }

    /// Atomically pull one subscriber out of a node event's subscriber list.
    pub fn unregister_node_event(
        &self,
        event_id: &str,
        subscriber_id: &str,
    ) -> StateResult<NodeEvent> {
        self.modify(NODE_EVENTS, event_id, "node event", |e: &mut NodeEvent| {
            set_remove(&mut e.subscribers, subscriber_id);
        })
    }

    /// Delete a node event by id.
    pub fn delete_node_event(&self, id: &str) -> StateResult<()> {
        self.remove(NODE_EVENTS, id, "node event")
    }
}
