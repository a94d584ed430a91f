//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::oplog::ServerOplog;
use plotsync_engine::{HttpResponse, LoopbackServer, OPERATIONS_PATH, PUSH_PATH};
use plotsync_protocol::{BatchResult, CatchUpRequest, PushRequest};
use std::sync::Arc;
use tracing::warn;

/// The sync server.
///
/// Handles push and catch-up requests against a shared [`ServerOplog`].
/// It speaks HTTP semantics through [`LoopbackServer`]; binding a socket
/// is left to the embedding application.
///
/// # Example
///
/// ```
/// use plotsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// assert_eq!(server.version("story"), 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_oplog(config, Arc::new(ServerOplog::new()))
    }

    /// Creates a sync server with an existing oplog.
    pub fn with_oplog(config: ServerConfig, oplog: Arc<ServerOplog>) -> Self {
        let context = Arc::new(HandlerContext::new(config, oplog));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles a push request.
    pub fn handle_push(
        &self,
        token: Option<&str>,
        request: PushRequest,
    ) -> ServerResult<BatchResult> {
        self.handler.handle_push(token, request)
    }

    /// Handles a catch-up request.
    pub fn handle_catch_up(
        &self,
        token: Option<&str>,
        request: CatchUpRequest,
    ) -> ServerResult<BatchResult> {
        self.handler.handle_catch_up(token, request)
    }

    /// Returns the current version of a project.
    pub fn version(&self, project_id: &str) -> u64 {
        self.context.oplog.version(project_id)
    }

    /// Returns the number of operations in a project.
    pub fn operation_count(&self, project_id: &str) -> usize {
        self.context.oplog.len(project_id)
    }

    /// Returns the shared oplog.
    pub fn oplog(&self) -> &Arc<ServerOplog> {
        &self.context.oplog
    }

    fn route(&self, path: &str, token: Option<&str>, body: &[u8]) -> ServerResult<BatchResult> {
        match path {
            PUSH_PATH => self.handle_push(token, PushRequest::decode(body)?),
            OPERATIONS_PATH => self.handle_catch_up(token, CatchUpRequest::decode(body)?),
            other => Err(ServerError::UnknownEndpoint(other.to_string())),
        }
    }
}

/// Renders an error as an HTTP response.
///
/// Conflicts carry a JSON [`BatchResult`] so the client learns the server
/// version; everything else is a plain-text message.
fn error_response(err: &ServerError) -> HttpResponse {
    let body = match err {
        ServerError::VersionConflict { server_version, .. } => {
            BatchResult::failure(vec![err.to_string()], *server_version)
                .encode()
                .unwrap_or_else(|_| err.to_string().into_bytes())
        }
        _ => err.to_string().into_bytes(),
    };
    HttpResponse::new(err.status_code(), body)
}

impl LoopbackServer for SyncServer {
    fn handle_post(&self, path: &str, bearer_token: Option<&str>, body: &[u8]) -> HttpResponse {
        let result = self
            .route(path, bearer_token, body)
            .and_then(|result| result.encode().map_err(ServerError::from));

        match result {
            Ok(body) => HttpResponse::new(200, body),
            Err(err) => {
                if err.is_server_error() {
                    warn!(path, error = %err, "request failed");
                }
                error_response(&err)
            }
        }
    }
}
