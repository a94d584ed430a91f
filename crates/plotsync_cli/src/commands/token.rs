//! Token command implementation.

use plotsync_server::{AuthConfig, TokenValidator};

/// Runs the token command.
pub fn run(secret: &str, device_id: &str, project_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    if secret.is_empty() {
        return Err("secret must not be empty".into());
    }
    let validator = TokenValidator::new(AuthConfig::new(secret.as_bytes().to_vec()));
    println!("{}", validator.create_token(device_id, project_id)?);
    Ok(())
}
