//! Request handlers for sync endpoints.

use crate::config::{AuthMode, ServerConfig};
use crate::error::{ServerError, ServerResult};
use crate::oplog::ServerOplog;
use plotsync_protocol::{BatchResult, CatchUpRequest, PushRequest};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Server oplog (shared across all handlers).
    pub oplog: Arc<ServerOplog>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, oplog: Arc<ServerOplog>) -> Self {
        Self { config, oplog }
    }

    /// Checks the bearer token and returns the authenticated device, if the
    /// mode binds one.
    fn authenticate(&self, token: Option<&str>, project_id: &str) -> ServerResult<Option<String>> {
        match &self.config.auth {
            AuthMode::Open => Ok(None),
            AuthMode::Shared(validator) => {
                validator.validate(token.ok_or_else(missing_token)?)?;
                Ok(None)
            }
            AuthMode::Signed(validator) => validator
                .validate_token(token.ok_or_else(missing_token)?, project_id)
                .map(Some),
        }
    }
}

fn missing_token() -> ServerError {
    ServerError::AuthenticationFailed("missing bearer token".into())
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a push request.
    pub fn handle_push(&self, token: Option<&str>, request: PushRequest) -> ServerResult<BatchResult> {
        let authenticated = self.context.authenticate(token, &request.project_id)?;
        if let Some(device) = authenticated {
            if device != request.device_id {
                return Err(ServerError::AuthenticationFailed(format!(
                    "token issued to {device}, request from {}",
                    request.device_id
                )));
            }
        }

        if request.operations.len() > self.context.config.max_push_batch {
            return Err(ServerError::InvalidRequest(format!(
                "Too many operations: {} > {}",
                request.operations.len(),
                self.context.config.max_push_batch
            )));
        }

        let count = request.operations.len();
        match self.context.oplog.append(
            &request.project_id,
            &request.device_id,
            request.known_version,
            request.operations,
        ) {
            Ok(outcome) => {
                info!(
                    project_id = %request.project_id,
                    device_id = %request.device_id,
                    operations = count,
                    duplicates = outcome.duplicates,
                    version = outcome.version,
                    "push accepted"
                );
                Ok(BatchResult::success(outcome.acknowledged, outcome.version))
            }
            Err(err @ ServerError::VersionConflict { .. }) => {
                warn!(
                    project_id = %request.project_id,
                    device_id = %request.device_id,
                    error = %err,
                    "push rejected"
                );
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Handles a catch-up request.
    pub fn handle_catch_up(
        &self,
        token: Option<&str>,
        request: CatchUpRequest,
    ) -> ServerResult<BatchResult> {
        self.context.authenticate(token, &request.project_id)?;

        let (operations, version) = self.context.oplog.operations_since(
            &request.project_id,
            request.since_version,
            self.context.config.max_catch_up_batch,
        );
        debug!(
            project_id = %request.project_id,
            since = request.since_version,
            returned = operations.len(),
            version,
            "catch-up served"
        );
        Ok(BatchResult::catch_up(operations, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use plotsync_protocol::Operation;
    use serde_json::json;

    fn make_op(device: &str, id: i64) -> Operation {
        Operation::new("node.create", "story", "main", "base", json!({}), id, device).with_id(id)
    }

    fn create_handler(config: ServerConfig) -> RequestHandler {
        let oplog = Arc::new(ServerOplog::new());
        RequestHandler::new(Arc::new(HandlerContext::new(config, oplog)))
    }

    #[test]
    fn catch_up_empty() {
        let handler = create_handler(ServerConfig::default());
        let response = handler
            .handle_catch_up(None, CatchUpRequest::new("story", 0))
            .unwrap();
        assert!(response.success);
        assert_eq!(response.server_operations, Some(vec![]));
    }

    #[test]
    fn push_and_catch_up() {
        let handler = create_handler(ServerConfig::default());

        let push = PushRequest::new("story", "a", 0, vec![make_op("a", 7), make_op("a", 8)]);
        let response = handler.handle_push(None, push).unwrap();
        assert!(response.success);
        assert_eq!(response.processed_operations, vec![7, 8]);
        assert_eq!(response.sync_version, 2);

        let response = handler
            .handle_catch_up(None, CatchUpRequest::new("story", 0))
            .unwrap();
        let ops = response.server_operations.unwrap();
        assert_eq!(ops.iter().map(|op| op.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn push_conflict() {
        let handler = create_handler(ServerConfig::default());
        handler
            .handle_push(None, PushRequest::new("story", "a", 0, vec![make_op("a", 1)]))
            .unwrap();

        let err = handler
            .handle_push(None, PushRequest::new("story", "b", 0, vec![make_op("b", 1)]))
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn push_batch_limit() {
        let handler = create_handler(ServerConfig::new().with_max_push_batch(1));
        let push = PushRequest::new("story", "a", 0, vec![make_op("a", 1), make_op("a", 2)]);
        assert!(matches!(
            handler.handle_push(None, push),
            Err(ServerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn shared_token_required() {
        let handler = create_handler(ServerConfig::new().with_shared_token("s3cret"));
        let request = || CatchUpRequest::new("story", 0);

        assert!(handler.handle_catch_up(None, request()).is_err());
        assert!(handler.handle_catch_up(Some("nope"), request()).is_err());
        assert!(handler.handle_catch_up(Some("s3cret"), request()).is_ok());
    }

    #[test]
    fn signed_token_binds_device() {
        let auth = AuthConfig::new(b"signing-secret".to_vec());
        let token = crate::auth::TokenValidator::new(auth.clone())
            .create_token("a", "story")
            .unwrap();
        let handler = create_handler(ServerConfig::new().with_auth(auth));

        let push = PushRequest::new("story", "a", 0, vec![make_op("a", 1)]);
        assert!(handler.handle_push(Some(&token), push).is_ok());

        let spoofed = PushRequest::new("story", "b", 1, vec![make_op("b", 1)]);
        let err = handler.handle_push(Some(&token), spoofed).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn catch_up_respects_limit() {
        let handler = create_handler(ServerConfig::new().with_max_catch_up_batch(2));
        let ops = (1..=3).map(|i| make_op("a", i)).collect();
        handler
            .handle_push(None, PushRequest::new("story", "a", 0, ops))
            .unwrap();

        let response = handler
            .handle_catch_up(None, CatchUpRequest::new("story", 0))
            .unwrap();
        assert_eq!(response.sync_version, 2);
        assert_eq!(response.server_operations.unwrap().len(), 2);
    }
}
