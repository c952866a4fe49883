//! ScriptedTransport: an in-process stand-in for a fleet of agents.
//!
//! Rules map a method and a URL fragment to a canned reply; the first rule
//! that matches wins. Unmatched requests answer like an unreachable agent.
//! Every request is recorded so callers can assert on what was sent.

use std::sync::Mutex;

use async_trait::async_trait;
use http::Method;

use crate::transport::{QueryParams, Reply, Transport};

/// A request observed by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub query: QueryParams,
    pub body: Option<String>,
}

impl RecordedCall {
    /// First value of query parameter `key`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// The body parsed as JSON, if any.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.body.as_deref().and_then(|b| serde_json::from_str(b).ok())
    }
}

struct Rule {
    method: Option<Method>,
    fragment: String,
    reply: Reply,
}

/// Transport that answers from a rule table instead of the network.
#[derive(Default)]
pub struct ScriptedTransport {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method` requests whose URL contains `fragment`.
    pub fn reply(&self, method: Method, fragment: &str, code: u16, body: &str) -> &Self {
        self.push_rule(Some(method), fragment, Reply::new(code, body));
        self
    }

    /// Answer requests of any method whose URL contains `fragment`.
    pub fn reply_any(&self, fragment: &str, code: u16, body: &str) -> &Self {
        self.push_rule(None, fragment, Reply::new(code, body));
        self
    }

    fn push_rule(&self, method: Option<Method>, fragment: &str, reply: Reply) {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Rule {
                method,
                fragment: fragment.to_string(),
                reply,
            });
    }

    /// Every request seen so far, in dispatch order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Requests whose method is `method` and URL contains `fragment`.
    pub fn calls_to(&self, method: Method, fragment: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.url.contains(fragment))
            .collect()
    }

    /// Forget recorded calls, keeping the rules.
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn answer(&self, method: &Method, url: &str) -> Reply {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|rule| {
                rule.method.as_ref().is_none_or(|m| m == method) && url.contains(&rule.fragment)
            })
            .map(|rule| rule.reply.clone())
            .unwrap_or_else(Reply::failed)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        method: Method,
        urls: &[String],
        query: Option<&QueryParams>,
        body: Option<&[u8]>,
    ) -> Vec<Reply> {
        let body = body.map(|b| String::from_utf8_lossy(b).into_owned());
        let mut replies = Vec::with_capacity(urls.len());
        for url in urls {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(RecordedCall {
                    method: method.clone(),
                    url: url.clone(),
                    query: query.cloned().unwrap_or_default(),
                    body: body.clone(),
                });
            replies.push(self.answer(&method, url));
        }
        replies
    }
}
