//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any library
//! (reqwest, hyper, a platform fetch bridge) can carry the requests. This
//! module owns the endpoints, the JSON bodies and the mapping from HTTP
//! status codes to [`SyncError`] variants.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncNetwork;
use async_trait::async_trait;
use parking_lot::RwLock;
use plotsync_protocol::{BatchResult, CatchUpRequest, Operation, PushRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Endpoint for pushing a batch of local operations.
pub const PUSH_PATH: &str = "/sync/push";

/// Endpoint for fetching operations since a version.
pub const OPERATIONS_PATH: &str = "/sync/operations";

/// An outgoing POST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// Session token sent as `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,
    /// JSON body.
    pub body: Vec<u8>,
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns the body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client abstraction.
///
/// `Err` means the request never produced a response (DNS, connect, reset).
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync network.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    token: RwLock<Option<String>>,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the session token.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    /// Replaces the session token, e.g. after the user logs in again.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Marks the transport offline. Engine cycles become no-ops.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Marks the transport online again.
    pub fn reopen(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    async fn post_json(&self, endpoint: &str, body: Vec<u8>) -> SyncResult<BatchResult> {
        let request = HttpRequest {
            url: format!("{}{}", self.base_url, endpoint),
            bearer_token: self.token.read().clone(),
            body,
        };

        let response = self.client.post(request).await.map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;

        debug!(endpoint, status = response.status, "sync request finished");

        match classify_response(&response) {
            Ok(result) => {
                *self.last_error.write() = None;
                Ok(result)
            }
            Err(err) => {
                *self.last_error.write() = Some(err.to_string());
                Err(err)
            }
        }
    }
}

/// Maps a response to a decoded result or a classified error.
///
/// - 2xx: the decoded [`BatchResult`]
/// - 401: [`SyncError::AuthenticationFailed`]
/// - 409: [`SyncError::VersionConflict`] carrying the body's `syncVersion`
/// - 408, 429, 5xx: retryable transport error
/// - other: permanent transport error
pub fn classify_response(response: &HttpResponse) -> SyncResult<BatchResult> {
    match response.status {
        200..=299 => Ok(BatchResult::decode(&response.body)?),
        401 => Err(SyncError::AuthenticationFailed(response.text())),
        409 => match BatchResult::decode(&response.body) {
            Ok(result) => Err(SyncError::VersionConflict {
                server_version: result.sync_version,
            }),
            Err(_) => Err(SyncError::transport_fatal(format!(
                "conflict response without a version: {}",
                response.text()
            ))),
        },
        status @ (408 | 429 | 500..=599) => Err(SyncError::transport_retryable(format!(
            "server returned {status}: {}",
            response.text()
        ))),
        status => Err(SyncError::transport_fatal(format!(
            "server returned {status}: {}",
            response.text()
        ))),
    }
}

#[async_trait]
impl<C: HttpClient> SyncNetwork for HttpTransport<C> {
    async fn send_operations(
        &self,
        project_id: &str,
        device_id: &str,
        known_version: u64,
        operations: &[Operation],
    ) -> SyncResult<BatchResult> {
        let body = PushRequest::new(project_id, device_id, known_version, operations.to_vec())
            .encode()?;
        self.post_json(PUSH_PATH, body).await
    }

    async fn get_operations(
        &self,
        project_id: &str,
        since_version: u64,
    ) -> SyncResult<BatchResult> {
        let body = CatchUpRequest::new(project_id, since_version).encode()?;
        self.post_json(OPERATIONS_PATH, body).await
    }

    fn is_online(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request to `path`.
    fn handle_post(&self, path: &str, bearer_token: Option<&str>, body: &[u8]) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, bearer_token: Option<&str>, body: &[u8]) -> HttpResponse {
        (**self).handle_post(path, bearer_token, body)
    }
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    healthy: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            healthy: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining connectivity.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        if !self.is_healthy() {
            return Err("connection refused".to_string());
        }
        let path = request
            .url
            .find("/sync/")
            .map_or(request.url.as_str(), |i| &request.url[i..]);

        Ok(self
            .server
            .handle_post(path, request.bearer_token.as_deref(), &request.body))
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
