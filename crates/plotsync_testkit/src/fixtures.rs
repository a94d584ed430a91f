//! Test fixtures: operations, wired-up devices and temporary stores.

use plotsync_engine::{
    FileVersionStore, HttpTransport, LoopbackClient, MemoryOperationStore, MemoryVersionStore,
    SyncConfig, SyncEngine,
};
use plotsync_protocol::Operation;
use plotsync_server::{ServerConfig, SyncServer};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Project id used by fixtures unless a test picks its own.
pub const TEST_PROJECT: &str = "test-project";

/// Builds an operation for `project_id` from `device_id`, numbered `seq`.
///
/// The id is left at 0; the queue assigns one on enqueue.
pub fn sample_operation(project_id: &str, device_id: &str, seq: i64) -> Operation {
    Operation::new(
        "node.update",
        project_id,
        "main",
        "base",
        json!({ "nodeId": format!("node-{seq}"), "text": format!("edit {seq}") }),
        1_700_000_000_000 + seq,
        device_id,
    )
}

/// Creates a shared in-process server.
pub fn shared_server(config: ServerConfig) -> Arc<SyncServer> {
    Arc::new(SyncServer::new(config))
}

/// Transport type used by [`TestDevice`].
pub type LoopbackTransport = HttpTransport<LoopbackClient<Arc<SyncServer>>>;

/// One device: an engine wired to an in-memory queue and version store,
/// talking to a shared server through a loopback transport.
pub struct TestDevice {
    /// The engine.
    pub engine: SyncEngine,
    /// The local pending-operation queue.
    pub storage: Arc<MemoryOperationStore>,
    /// The persisted version store.
    pub versions: Arc<MemoryVersionStore>,
    /// The network the engine uses.
    pub transport: Arc<LoopbackTransport>,
    device_id: String,
    project_id: String,
}

impl TestDevice {
    /// Connects a new device to `server` for `project_id`.
    pub fn connect(
        server: &Arc<SyncServer>,
        project_id: &str,
        device_id: &str,
        config: SyncConfig,
    ) -> Self {
        Self::connect_with_token(server, project_id, device_id, config, None)
    }

    /// Connects a new device that sends `token` with every request.
    pub fn connect_with_token(
        server: &Arc<SyncServer>,
        project_id: &str,
        device_id: &str,
        config: SyncConfig,
        token: Option<String>,
    ) -> Self {
        let storage = Arc::new(MemoryOperationStore::new());
        let versions = Arc::new(MemoryVersionStore::new());
        let transport = HttpTransport::new(
            "http://sync.test",
            LoopbackClient::new(Arc::clone(server)),
        );
        transport.set_token(token);
        let transport = Arc::new(transport);

        let engine = SyncEngine::new(
            config,
            project_id,
            device_id,
            Arc::clone(&storage),
            Arc::clone(&transport),
            Arc::clone(&versions),
        )
        .expect("Failed to build engine");

        Self {
            engine,
            storage,
            versions,
            transport,
            device_id: device_id.to_string(),
            project_id: project_id.to_string(),
        }
    }

    /// Enqueues `count` fresh operations and returns their local ids.
    pub fn enqueue(&self, count: usize) -> Vec<i64> {
        let start = self.storage.pending_ids().len() as i64;
        (0..count as i64)
            .map(|i| {
                self.storage
                    .enqueue(sample_operation(&self.project_id, &self.device_id, start + i))
            })
            .collect()
    }

    /// Returns the device id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// A file-backed version store in a temporary directory.
pub struct TempVersionStore {
    /// The store.
    pub store: Arc<FileVersionStore>,
    dir: TempDir,
}

impl TempVersionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileVersionStore::open(dir.path().join("versions.json"))
            .expect("Failed to open version store");
        Self {
            store: Arc::new(store),
            dir,
        }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("versions.json")
    }

    /// Opens a second handle on the same file, as a restarted process would.
    pub fn reopen(&self) -> FileVersionStore {
        FileVersionStore::open(self.path()).expect("Failed to reopen version store")
    }
}

impl Default for TempVersionStore {
    fn default() -> Self {
        Self::new()
    }
}
