//! # Plotsync Server
//!
//! Reference sync server for the plotsync operation log.
//!
//! This crate provides:
//! - Push and catch-up endpoints
//! - A per-project canonical oplog with version-conflict detection
//! - Authentication (shared secret or HMAC-SHA256 signed tokens)
//! - A [`plotsync_engine::LoopbackServer`] implementation so engines can
//!   talk to it in-process
//!
//! # Versions
//!
//! A project's version is the number of operations it has accepted. A push
//! declares the version its device last saw; the push is refused with a
//! conflict if any other device wrote after that point, which forces the
//! client to catch up first.
//!
//! # Authentication
//!
//! ```rust,ignore
//! use plotsync_server::{AuthConfig, ServerConfig, TokenValidator};
//!
//! let auth = AuthConfig::new(b"my-secure-secret-32-bytes-long!".to_vec());
//! let token = TokenValidator::new(auth.clone()).create_token("laptop", "story-1")?;
//! let config = ServerConfig::default().with_auth(auth);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod oplog;
mod server;

pub use auth::{AuthConfig, SimpleTokenValidator, TokenValidator};
pub use config::{AuthMode, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use oplog::{AppendOutcome, ServerOplog};
pub use server::SyncServer;
