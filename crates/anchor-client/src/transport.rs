//! The fan-out contract shared by the real pool and test doubles.

use std::collections::BTreeMap;

use async_trait::async_trait;
use http::Method;

/// Code reported for a slot whose request never produced an HTTP response.
pub const TRANSPORT_ERROR: u16 = 500;

/// Query parameters appended to every URL of a batch (`key → [values]`).
pub type QueryParams = BTreeMap<String, Vec<String>>;

/// Outcome of one request in a fan-out batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub body: String,
}

impl Reply {
    pub fn new(code: u16, body: impl Into<String>) -> Self {
        Self {
            code,
            body: body.into(),
        }
    }

    /// The reply recorded for a request that failed before a response arrived.
    pub fn failed() -> Self {
        Self::new(TRANSPORT_ERROR, String::new())
    }

    /// Whether the code is in `[200, 299]`.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Parallel dispatcher of one request shape to many URLs.
///
/// Implementations must return exactly `urls.len()` replies with
/// `replies[i]` belonging to `urls[i]`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: Method,
        urls: &[String],
        query: Option<&QueryParams>,
        body: Option<&[u8]>,
    ) -> Vec<Reply>;
}

/// Append URL-encoded `query` pairs to `url`.
pub fn with_query(url: &str, query: Option<&QueryParams>) -> String {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return url.to_string();
    };
    let mut encoded = url::form_urlencoded::Serializer::new(String::new());
    for (key, values) in query {
        for value in values {
            encoded.append_pair(key, value);
        }
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{}", encoded.finish())
}
