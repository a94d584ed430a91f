//! # Plotsync Testkit
//!
//! Test utilities for plotsync.
//!
//! This crate provides:
//! - Operation fixtures and wired-up test devices
//! - Gated network and store wrappers for observing cycle concurrency
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use plotsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn two_devices() {
//!     let server = shared_server(ServerConfig::default());
//!     let laptop = TestDevice::connect(&server, TEST_PROJECT, "laptop", SyncConfig::default());
//!     laptop.enqueue(3);
//!     laptop.engine.start().unwrap();
//!     laptop.engine.trigger_sync().await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod network;
pub mod store;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::network::*;
    pub use crate::store::*;
    pub use plotsync_engine::SyncConfig;
    pub use plotsync_server::ServerConfig;
}

pub use fixtures::*;
pub use generators::*;
pub use network::*;
pub use store::*;
