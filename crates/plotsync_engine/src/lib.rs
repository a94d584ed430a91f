//! # Plotsync Engine
//!
//! Client-side sync engine for offline-first narrative editing.
//!
//! This crate provides:
//! - The sync lifecycle (stopped → running ⇄ paused, error on exhausted retries)
//! - Batch draining of the local operation queue
//! - Version tracking with catch-up when the server is ahead
//! - Retry bookkeeping with configurable spacing
//! - Typed event subscriptions
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! The engine is a **push-then-catch-up** replicator:
//! 1. Read a batch from the local queue
//! 2. Send it with the last known server version
//! 3. On acknowledgment, delete what the server accepted and advance the version
//! 4. If the server reports a newer version, fetch what this device missed
//!    and hand it to the application
//!
//! ## Key Invariants
//!
//! - At most one cycle in flight per engine
//! - A local operation is deleted only after the server acknowledged its id
//! - The persisted version never decreases
//! - Catch-up never deletes local operations
//! - Results arriving after `stop()` are discarded

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod events;
mod http;
mod state;
mod store;
mod transport;
mod version;

pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncEngineBuilder, AUTH_FAILED_MESSAGE};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, EventKind, Subscription, SyncEvent, SyncSummary};
pub use http::{
    classify_response, HttpClient, HttpRequest, HttpResponse, HttpTransport, LoopbackClient,
    LoopbackServer, OPERATIONS_PATH, PUSH_PATH,
};
pub use state::{CycleOutcome, CycleReport, SkipReason, SyncStats, SyncStatus};
pub use store::{MemoryOperationStore, OperationStore};
pub use transport::{MockNetwork, SyncNetwork};
pub use version::{version_key, FileVersionStore, MemoryVersionStore, VersionStore};

pub use plotsync_protocol::{BatchResult, Operation};
