//! Query filters and the identifiers derived from them.

use anchor_state::{EventId, QueryMap, SubscriberId};
use sha1::{Digest, Sha1};

pub const GROUP_ID: &str = "groupId";
pub const NODE_ID: &str = "nodeId";
pub const APP_ID: &str = "appId";
pub const IMAGE_NAME: &str = "imageName";

/// Placeholder for an absent filter key in the event id hash.
const WILDCARD: &str = "ALL";

/// A `{groupId?, nodeId?, appId?, imageName?}` filter.
///
/// Only the first value of each key is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub group_id: Option<String>,
    pub node_id: Option<String>,
    pub app_id: Option<String>,
    pub image_name: Option<String>,
}

impl QueryFilter {
    pub fn from_query(query: &QueryMap) -> Self {
        let first = |key: &str| {
            query
                .get(key)
                .and_then(|values| values.first())
                .filter(|v| !v.is_empty())
                .cloned()
        };
        Self {
            group_id: first(GROUP_ID),
            node_id: first(NODE_ID),
            app_id: first(APP_ID),
            image_name: first(IMAGE_NAME),
        }
    }

    /// Filter matching exactly one node.
    pub fn node(node_id: &str) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            ..Self::default()
        }
    }

    pub fn to_query(&self) -> QueryMap {
        let mut query = QueryMap::new();
        let pairs = [
            (GROUP_ID, &self.group_id),
            (NODE_ID, &self.node_id),
            (APP_ID, &self.app_id),
            (IMAGE_NAME, &self.image_name),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                query.insert(key.to_string(), vec![value.clone()]);
            }
        }
        query
    }

    /// Canonical event id: SHA1 over groupId‖nodeId‖imageName‖appId,
    /// absent keys contributing `"ALL"`.
    pub fn event_id(&self) -> EventId {
        let part = |v: &Option<String>| v.as_deref().unwrap_or(WILDCARD).to_string();
        sha1_hex(&[
            &part(&self.group_id),
            &part(&self.node_id),
            &part(&self.image_name),
            &part(&self.app_id),
        ])
    }
}

/// `SHA1(event_id ‖ url ‖ statuses joined)`.
pub fn subscriber_id(event_id: &str, url: &str, status: &[String]) -> SubscriberId {
    sha1_hex(&[event_id, url, &status.concat()])
}

/// Lowercase hex SHA1 over the concatenation of `parts`.
pub fn sha1_hex(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
