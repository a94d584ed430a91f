//! # Plotsync Protocol
//!
//! Wire types for the plotsync operation log.
//!
//! This crate provides:
//! - `Operation`, the unit of replication
//! - `BatchResult`, the server's answer to a push or catch-up fetch
//! - Request messages (`PushRequest`, `CatchUpRequest`)
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations. Operation payloads
//! are opaque to every layer in this workspace.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod operation;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{BatchResult, CatchUpRequest, PushRequest};
pub use operation::Operation;
