//! Authentication support for the sync server.
//!
//! Signed tokens use HMAC-SHA256 and carry a timestamp for expiration
//! checking.
//!
//! ## Token Format
//!
//! `<device_id>.<timestamp>.<signature>` where:
//! - `timestamp` is Unix millis in decimal
//! - `signature` is the hex HMAC over the length-prefixed device id, the
//!   length-prefixed project id and the big-endian timestamp
//!
//! The project is not in the token; a token only validates against the
//! project it was issued for.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// Token validator for incoming requests.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for a device on a project, issued now.
    pub fn create_token(&self, device_id: &str, project_id: &str) -> ServerResult<String> {
        self.create_token_at(device_id, project_id, now_millis())
    }

    /// Creates a token with an explicit issue time.
    pub fn create_token_at(
        &self,
        device_id: &str,
        project_id: &str,
        issued_at_millis: u64,
    ) -> ServerResult<String> {
        let mac = self.mac(device_id, project_id, issued_at_millis)?;
        let signature = to_hex(&mac.finalize().into_bytes());
        Ok(format!("{device_id}.{issued_at_millis}.{signature}"))
    }

    /// Validates a token for `project_id` and returns the device it was issued to.
    pub fn validate_token(&self, token: &str, project_id: &str) -> ServerResult<String> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature), Some(timestamp), Some(device_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(rejected("malformed token"));
        };

        let timestamp: u64 = timestamp
            .parse()
            .map_err(|_| rejected("malformed token timestamp"))?;
        let signature = from_hex(signature).ok_or_else(|| rejected("malformed token signature"))?;

        self.mac(device_id, project_id, timestamp)?
            .verify_slice(&signature)
            .map_err(|_| rejected("invalid signature"))?;

        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if now_millis() > timestamp.saturating_add(expiry_millis) {
            return Err(rejected("token expired"));
        }

        Ok(device_id.to_string())
    }

    fn mac(&self, device_id: &str, project_id: &str, timestamp: u64) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("invalid HMAC key: {e}")))?;
        for field in [device_id, project_id] {
            mac.update(&(field.len() as u32).to_be_bytes());
            mac.update(field.as_bytes());
        }
        mac.update(&timestamp.to_be_bytes());
        Ok(mac)
    }
}

/// Simple token validator that doesn't check expiration.
/// Useful for testing.
#[derive(Clone)]
pub struct SimpleTokenValidator {
    secret: String,
}

impl SimpleTokenValidator {
    /// Creates a validator with a simple shared secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Validates that the token equals the secret.
    pub fn validate(&self, token: &str) -> ServerResult<()> {
        if token == self.secret {
            Ok(())
        } else {
            Err(rejected("invalid token"))
        }
    }
}

impl fmt::Debug for SimpleTokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleTokenValidator").finish_non_exhaustive()
    }
}

fn rejected(reason: &str) -> ServerError {
    ServerError::AuthenticationFailed(reason.to_string())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let token = validator.create_token("laptop", "story").unwrap();

        assert_eq!(validator.validate_token(&token, "story").unwrap(), "laptop");
    }

    #[test]
    fn device_ids_may_contain_dots() {
        let validator = validator();
        let token = validator.create_token("host.local", "story").unwrap();

        assert_eq!(
            validator.validate_token(&token, "story").unwrap(),
            "host.local"
        );
    }

    #[test]
    fn reject_wrong_project() {
        let validator = validator();
        let token = validator.create_token("laptop", "story").unwrap();

        assert!(validator.validate_token(&token, "other").is_err());
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let token = validator.create_token("laptop", "story").unwrap();
        let forged = token.replacen("laptop", "tablet", 1);

        let err = validator.validate_token(&forged, "story").unwrap_err();
        assert_eq!(err, ServerError::AuthenticationFailed("invalid signature".into()));
    }

    #[test]
    fn reject_malformed_token() {
        let validator = validator();
        assert!(validator.validate_token("garbage", "story").is_err());
        assert!(validator.validate_token("laptop.123.zz", "story").is_err());
        assert!(validator.validate_token("laptop.abc.00", "story").is_err());
    }

    #[test]
    fn reject_expired_token() {
        let validator = TokenValidator::new(
            AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec())
                .with_expiry(Duration::from_secs(60)),
        );
        let issued = now_millis() - 120_000;
        let token = validator.create_token_at("laptop", "story", issued).unwrap();

        let err = validator.validate_token(&token, "story").unwrap_err();
        assert_eq!(err, ServerError::AuthenticationFailed("token expired".into()));
    }

    #[test]
    fn simple_validator() {
        let validator = SimpleTokenValidator::new("shared-secret");

        assert!(validator.validate("shared-secret").is_ok());
        assert!(validator.validate("wrong-secret").is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", validator());
        assert!(!rendered.contains("test-secret"));
    }
}
