//! Three-valued result aggregation and response envelopes.
//!
//! A fan-out call produces one code per addressed node. The codes fold into
//! a single [`Status`]: `Ok` when every code is 2xx, `Error` when none is,
//! `MultiStatus` otherwise. Non-`Ok` outcomes carry a `responses` list with
//! one [`Entry`] per node, in the order the nodes were addressed.

use anchor_client::Reply;
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Result code of an all-successful call.
pub const OK: u16 = 200;
/// Result code of a partially successful fan-out.
pub const MULTI_STATUS: u16 = 207;
/// Result code of a failed call.
pub const ERROR: u16 = 500;

/// Aggregated status of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    MultiStatus,
    Error,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => OK,
            Status::MultiStatus => MULTI_STATUS,
            Status::Error => ERROR,
        }
    }
}

/// Whether `code` counts as success.
pub fn is_success(code: u16) -> bool {
    (200..300).contains(&code)
}

/// Fold per-node codes into one status. An empty batch is `Ok`.
pub fn aggregate(codes: &[u16]) -> Status {
    let successes = codes.iter().filter(|c| is_success(**c)).count();
    if successes == codes.len() {
        Status::Ok
    } else if successes == 0 {
        Status::Error
    } else {
        Status::MultiStatus
    }
}

/// What an operation answers: a status plus a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: Status,
    pub body: Value,
}

impl Outcome {
    pub fn new(status: Status, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(Status::Ok, body)
    }

    /// `Ok` with `{"id": id}`.
    pub fn id(id: &str) -> Self {
        Self::ok(json!({ "id": id }))
    }

    /// `Error` with `{"message": message}`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, json!({ "message": message.into() }))
    }

    pub fn code(&self) -> u16 {
        self.status.code()
    }
}

/// One node's line in a separated-responses envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub id: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Agent response fields spread into the entry.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entry {
    /// Build an entry from a reply; failures carry the agent's message.
    pub fn from_reply(id: &str, reply: &Reply) -> Self {
        Self {
            id: id.to_string(),
            code: reply.code,
            message: (!reply.is_success()).then(|| agent_message(reply)),
            fields: Map::new(),
        }
    }

    /// A success turned into a failure by the controller.
    pub fn rejected(id: &str, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            code: ERROR,
            message: Some(message.into()),
            fields: Map::new(),
        }
    }

    /// Spread a successful agent response into the entry.
    ///
    /// Objects are merged field by field; other JSON values land under
    /// `response`. `id`, `code` and `message` stay the controller's.
    pub fn spread(mut self, reply: &Reply) -> Self {
        if !reply.is_success() {
            return self;
        }
        match serde_json::from_str::<Value>(&reply.body) {
            Ok(Value::Object(map)) => {
                for (key, value) in map {
                    if !matches!(key.as_str(), "id" | "code" | "message") {
                        self.fields.insert(key, value);
                    }
                }
            }
            Ok(other) => {
                self.fields.insert("response".to_string(), other);
            }
            Err(_) => {}
        }
        self
    }
}

/// Build the separated-responses envelope, optionally with extra top-level fields.
pub fn envelope(entries: &[Entry], extra: Map<String, Value>) -> Value {
    let mut body = extra;
    body.insert(
        "responses".to_string(),
        serde_json::to_value(entries).unwrap_or_else(|_| Value::Array(Vec::new())),
    );
    Value::Object(body)
}

/// The most useful human-readable reason a failed reply carries.
///
/// Prefers the agent's `{"message": ...}`, then the raw body.
pub fn agent_message(reply: &Reply) -> String {
    if let Some(Value::String(message)) = parse_object(&reply.body).and_then(|mut m| m.remove("message")) {
        return message;
    }
    let body = reply.body.trim();
    if body.is_empty() {
        format!("agent request failed with code {}", reply.code)
    } else {
        body.to_string()
    }
}

/// Parse a body as a JSON object.
pub fn parse_object(body: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
