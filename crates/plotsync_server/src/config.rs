//! Server configuration.

use crate::auth::{AuthConfig, SimpleTokenValidator, TokenValidator};

/// How requests are authenticated.
#[derive(Debug, Clone, Default)]
pub enum AuthMode {
    /// Every request is accepted.
    #[default]
    Open,
    /// Bearer token must equal a shared secret.
    Shared(SimpleTokenValidator),
    /// Bearer token must be a valid, unexpired signed token.
    Signed(TokenValidator),
}

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum operations accepted in one push.
    pub max_push_batch: usize,
    /// Maximum operations returned by one catch-up fetch.
    pub max_catch_up_batch: usize,
    /// Request authentication.
    pub auth: AuthMode,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new() -> Self {
        Self {
            max_push_batch: 500,
            max_catch_up_batch: 1000,
            auth: AuthMode::Open,
        }
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets the maximum catch-up batch size.
    pub fn with_max_catch_up_batch(mut self, size: usize) -> Self {
        self.max_catch_up_batch = size;
        self
    }

    /// Requires signed tokens created with the given secret.
    pub fn with_auth(mut self, config: AuthConfig) -> Self {
        self.auth = AuthMode::Signed(TokenValidator::new(config));
        self
    }

    /// Requires a fixed shared token.
    pub fn with_shared_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthMode::Shared(SimpleTokenValidator::new(token));
        self
    }

    /// Returns true if requests must carry a token.
    pub fn requires_auth(&self) -> bool {
        !matches!(self.auth, AuthMode::Open)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_push_batch, 500);
        assert!(!config.requires_auth());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_push_batch(50)
            .with_max_catch_up_batch(10)
            .with_shared_token("secret");

        assert_eq!(config.max_push_batch, 50);
        assert_eq!(config.max_catch_up_batch, 10);
        assert!(config.requires_auth());
    }
}
