use async_trait::async_trait;
use futures::StreamExt;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::proxy::ProxyEndpoint;

/// Upper bound on a fetched page body (5MB)
const MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

/// Number of per-proxy HTTP clients kept warm
const CLIENT_CACHE_SIZE: usize = 64;

/// Failure of a single attempt below the HTTP layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No complete response within the per-attempt timeout
    #[error("Request timed out")]
    Timeout,
    /// The proxy (or origin) refused or dropped the connection
    #[error("Connection failed: {0}")]
    Connect(String),
    /// Body exceeded the size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("{0}")]
    Other(String),
}

/// A logical GET request, independent of the proxy it is sent through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// What came back from one attempt, after redirects were followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResponse {
    pub status: u16,
    /// URL of the last hop; differs from the request URL after a redirect
    pub final_url: Url,
    pub body: String,
}

impl AttemptResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request through one proxy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        proxy: &ProxyEndpoint,
        request: &FetchRequest,
    ) -> Result<AttemptResponse, TransportError>;
}

/// HTTP transport backed by `reqwest`, one client per proxy.
///
/// `reqwest` binds proxies at client construction, so clients are cached per
/// proxy address (bounded LRU) to keep connection pools warm across fetches.
pub struct ReqwestTransport {
    clients: Mutex<LruCache<Url, reqwest::Client>>,
    user_agent: String,
    timeout: Duration,
}

impl ReqwestTransport {
    /// `timeout` is enforced by the client as well as by the fetcher, so a
    /// slow body download through a stalled proxy also counts as a timeout.
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        let capacity = NonZeroUsize::new(CLIENT_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            clients: Mutex::new(LruCache::new(capacity)),
            user_agent: user_agent.into(),
            timeout,
        }
    }

    fn client_for(&self, proxy: &ProxyEndpoint) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(proxy.address()) {
            return Ok(client.clone());
        }

        let proxy_config = reqwest::Proxy::all(proxy.address().as_str())
            .map_err(|e| TransportError::Other(format!("invalid proxy {proxy}: {e}")))?;
        let client = reqwest::Client::builder()
            .proxy(proxy_config)
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        clients.put(proxy.address().clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        proxy: &ProxyEndpoint,
        request: &FetchRequest,
    ) -> Result<AttemptResponse, TransportError> {
        let client = self.client_for(proxy)?;

        let mut builder = client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let body = read_limited_text(response, MAX_BODY_SIZE).await?;

        Ok(AttemptResponse {
            status,
            final_url,
            body,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, TransportError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(TransportError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_reqwest_error)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(TransportError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
