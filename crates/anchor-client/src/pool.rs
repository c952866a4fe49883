//! HttpPool: hyper-backed fan-out dispatcher.
//!
//! Each URL of a batch is fetched by its own tokio task; a semaphore caps
//! how many requests are in flight at once across all batches. Replies are
//! collected by awaiting the task handles in input order, so the output
//! vector is indexed like the input regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::transport::{QueryParams, Reply, Transport, with_query};

/// Tuning knobs for the fan-out pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound for one request, connect through body.
    pub request_timeout: Duration,
    /// Maximum number of concurrently running requests.
    pub max_concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_concurrency: 64,
        }
    }
}

/// Fan-out pool over a shared keep-alive HTTP/1 client.
#[derive(Clone)]
pub struct HttpPool {
    client: Client<HttpConnector, Full<Bytes>>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
}

impl HttpPool {
    pub fn new(config: PoolConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl Default for HttpPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[async_trait]
impl Transport for HttpPool {
    async fn send(
        &self,
        method: Method,
        urls: &[String],
        query: Option<&QueryParams>,
        body: Option<&[u8]>,
    ) -> Vec<Reply> {
        let body = body.map(Bytes::copy_from_slice);
        let mut handles = Vec::with_capacity(urls.len());

        for url in urls {
            let client = self.client.clone();
            let permits = Arc::clone(&self.permits);
            let method = method.clone();
            let url = with_query(url, query);
            let body = body.clone();
            let timeout = self.config.request_timeout;

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Reply::failed();
                };
                fetch(&client, method, &url, body, timeout).await
            }));
        }

        let mut replies = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    warn!(index, error = %e, "fan-out task aborted");
                    replies.push(Reply::failed());
                }
            }
        }
        replies
    }
}

/// Perform one request, folding every failure into [`Reply::failed`].
async fn fetch(
    client: &Client<HttpConnector, Full<Bytes>>,
    method: Method,
    url: &str,
    body: Option<Bytes>,
    timeout: Duration,
) -> Reply {
    let mut builder = http::Request::builder()
        .method(method.clone())
        .uri(url)
        .header("user-agent", "anchor/0.1");
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let request = match builder.body(Full::new(body.unwrap_or_default())) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, %url, "invalid agent request");
            return Reply::failed();
        }
    };

    let exchange = async {
        let response = match client.request(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, %method, %url, "agent request failed");
                return Reply::failed();
            }
        };
        let code = response.status().as_u16();
        match response.into_body().collect().await {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                Reply::new(code, String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) => {
                debug!(error = %e, %url, "agent response body unreadable");
                Reply::failed()
            }
        }
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(reply) => {
            debug!(%method, %url, code = reply.code, "agent replied");
            reply
        }
        Err(_) => {
            debug!(%method, %url, "agent request timed out");
            Reply::failed()
        }
    }
}
