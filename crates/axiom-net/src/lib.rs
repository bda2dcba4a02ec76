//! # Axiom Net
//!
//! HTTP client wrapper and connectivity detection for the Axiom offline
//! worker.
//!
//! ## Design Goals
//!
//! 1. **Explicit wrapper**: every request site calls through
//!    [`NetworkBackend`] instead of a patched global fetch
//! 2. **Mockable seam**: the backend trait keeps the fetch interceptor
//!    testable without a network
//! 3. **Connectivity as a decorator**: [`MonitoredBackend`] observes fetch
//!    outcomes and drives the shared online/offline flag

use std::future::Future;

use bytes::Bytes;
use hashbrown::HashMap;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

pub mod connectivity;

pub use connectivity::{ConnectivityMonitor, MonitoredBackend};

// ==================== Errors ====================

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

// ==================== Request ====================

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request method, uppercased.
    pub method: String,

    /// Request URL.
    pub url: Url,

    /// Request headers.
    pub headers: HashMap<String, String>,
}

impl FetchRequest {
    /// Create a request.
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            headers: HashMap::new(),
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Whether this is a GET request.
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Request target path.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Whether the target shares scheme+host+port with `scope`.
    pub fn same_origin(&self, scope: &Url) -> bool {
        self.url.origin() == scope.origin()
    }
}

// ==================== Response ====================

/// How much of a response the requesting context may inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Same-origin response; fully inspectable.
    Basic,
    /// Cross-origin response delivered under CORS.
    Cors,
    /// Cross-origin response whose body/status are hidden. Never cached.
    Opaque,
}

/// An HTTP response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Bytes,

    /// Response kind.
    pub kind: ResponseKind,

    /// Whether a redirect was followed to produce this response.
    pub redirected: bool,

    /// Whether served from the offline cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a synthetic network-error response.
    pub fn network_error() -> Self {
        Self {
            status: 0,
            status_text: "Network Error".to_string(),
            headers: HashMap::new(),
            body: Bytes::new(),
            kind: ResponseKind::Opaque,
            redirected: false,
            from_cache: false,
        }
    }

    /// Whether this response may be stored in the offline cache.
    ///
    /// Only a 200 "basic" (same-origin, non-redirected) response qualifies.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.kind == ResponseKind::Basic && !self.redirected
    }

    /// Check if response is success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ==================== Backend ====================

/// The seam between the offline worker and the network.
///
/// Implementations perform one network fetch per call. The worker treats
/// the backend as its only path to the network; cache-first decisions are
/// layered on top.
pub trait NetworkBackend: Send + Sync {
    /// Perform the network fetch for a request.
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<FetchResponse, NetError>> + Send;
}

impl<N: NetworkBackend> NetworkBackend for std::sync::Arc<N> {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<FetchResponse, NetError>> + Send {
        (**self).fetch(request)
    }
}

// ==================== HTTP Backend ====================

/// reqwest-backed network backend.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend with a default client.
    pub fn new() -> Result<Self, NetError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }

    /// Create a backend over an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl NetworkBackend for HttpBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| NetError::RequestFailed(format!("bad method: {}", request.method)))?;

        debug!(method = %request.method, url = %request.url, "network fetch");

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();
        let final_url = response.url().clone();
        let redirected = final_url != request.url;
        let kind = if final_url.origin() == request.url.origin() {
            ResponseKind::Basic
        } else {
            ResponseKind::Opaque
        };

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.to_string(), value.to_string());
            }
        }

        let body = response.bytes().await?;
        trace!(status, bytes = body.len(), "network fetch complete");

        Ok(FetchResponse {
            status,
            status_text,
            headers,
            body,
            kind,
            redirected,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_request_method_normalized() {
        let request = FetchRequest::new("post", url("https://axiom.app/api/quests"));
        assert_eq!(request.method, "POST");
        assert!(!request.is_get());
    }

    #[test]
    fn test_request_same_origin() {
        let scope = url("https://axiom.app/");
        let same = FetchRequest::get(url("https://axiom.app/explore"));
        let other_host = FetchRequest::get(url("https://cdn.axiom.app/logo.png"));
        let other_scheme = FetchRequest::get(url("http://axiom.app/explore"));

        assert!(same.same_origin(&scope));
        assert!(!other_host.same_origin(&scope));
        assert!(!other_scheme.same_origin(&scope));
    }

    #[test]
    fn test_request_path() {
        let request = FetchRequest::get(url("https://axiom.app/api/users?page=2"));
        assert_eq!(request.path(), "/api/users");
    }

    #[test]
    fn test_cacheable_requires_basic_200_direct() {
        let mut response = FetchResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body: Bytes::from_static(b"ok"),
            kind: ResponseKind::Basic,
            redirected: false,
            from_cache: false,
        };
        assert!(response.is_cacheable());

        response.status = 404;
        assert!(!response.is_cacheable());

        response.status = 200;
        response.kind = ResponseKind::Opaque;
        assert!(!response.is_cacheable());

        response.kind = ResponseKind::Basic;
        response.redirected = true;
        assert!(!response.is_cacheable());
    }

    #[test]
    fn test_network_error_response() {
        let response = FetchResponse::network_error();
        assert_eq!(response.status, 0);
        assert!(!response.is_success());
        assert!(!response.is_cacheable());
    }
}
