//! Simulate command implementation.
//!
//! Two devices share an in-process server. The first queues a backlog and
//! drains it; the second queues one edit, hits a version conflict on its
//! first cycle, catches up, then pushes.

use plotsync_engine::{
    EventKind, HttpTransport, LoopbackClient, MemoryOperationStore, MemoryVersionStore,
    SyncConfig, SyncEngine, SyncEvent, SyncStats,
};
use plotsync_protocol::Operation;
use plotsync_server::{ServerConfig, SyncServer};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use uuid::Uuid;

/// Result of a simulation run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Project id.
    pub project_id: String,
    /// Server version after both devices synced.
    pub server_version: u64,
    /// Operations in the server log.
    pub server_operations: usize,
    /// Per-device results.
    pub devices: Vec<DeviceReport>,
}

/// Stats of one simulated device.
#[derive(Debug, Serialize)]
pub struct DeviceReport {
    /// Device id.
    pub device_id: String,
    /// Local sync version.
    pub sync_version: u64,
    /// Operations acknowledged by the server.
    pub operations_processed: u64,
    /// Acknowledged batches.
    pub successful_syncs: u64,
    /// Failed cycles.
    pub failed_syncs: u64,
    /// Catch-ups performed.
    pub catch_ups: u64,
    /// Server operations received through catch-up.
    pub operations_received: usize,
    /// Operations still queued.
    pub pending_operations: usize,
}

impl DeviceReport {
    fn new(device_id: &str, stats: &SyncStats, received: usize) -> Self {
        Self {
            device_id: device_id.to_string(),
            sync_version: stats.sync_version,
            operations_processed: stats.total_operations_processed,
            successful_syncs: stats.successful_syncs,
            failed_syncs: stats.failed_syncs,
            catch_ups: stats.catch_ups,
            operations_received: received,
            pending_operations: stats.pending_operations,
        }
    }
}

struct SimulatedDevice {
    device_id: String,
    engine: SyncEngine,
    storage: Arc<MemoryOperationStore>,
    received: Arc<AtomicUsize>,
}

impl SimulatedDevice {
    fn connect(
        server: &Arc<SyncServer>,
        project_id: &str,
        config: SyncConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let device_id = Uuid::new_v4().to_string();
        let storage = Arc::new(MemoryOperationStore::new());
        let transport = HttpTransport::new(
            "http://localhost/",
            LoopbackClient::new(Arc::clone(server)),
        );

        let engine = SyncEngine::builder()
            .config(config)
            .project_id(project_id)
            .device_id(device_id.as_str())
            .storage(Arc::clone(&storage))
            .network(Arc::new(transport))
            .version_store(Arc::new(MemoryVersionStore::new()))
            .build()?;

        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        engine.on(EventKind::ServerOperationsReceived, move |event| {
            if let SyncEvent::ServerOperationsReceived { operations, .. } = event {
                counter.fetch_add(operations.len(), Ordering::Relaxed);
            }
        });

        Ok(Self {
            device_id,
            engine,
            storage,
            received,
        })
    }

    fn edit(&self, project_id: &str, seq: usize) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64);
        self.storage.enqueue(Operation::new(
            "node.update",
            project_id,
            "main",
            "base",
            json!({ "nodeId": format!("node-{seq}"), "text": format!("draft {seq}") }),
            timestamp,
            self.device_id.as_str(),
        ));
    }

    fn report(&self) -> DeviceReport {
        DeviceReport::new(
            &self.device_id,
            &self.engine.stats(),
            self.received.load(Ordering::Relaxed),
        )
    }
}

/// Runs the simulate command.
pub fn run(
    operations: usize,
    batch_size: usize,
    project_id: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(simulate(operations, batch_size, project_id))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report),
    }

    Ok(())
}

async fn simulate(
    operations: usize,
    batch_size: usize,
    project_id: &str,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let config = SyncConfig::new().with_batch_size(batch_size);

    let writer = SimulatedDevice::connect(&server, project_id, config.clone())?;
    let latecomer = SimulatedDevice::connect(&server, project_id, config)?;

    for seq in 0..operations {
        writer.edit(project_id, seq);
    }
    latecomer.edit(project_id, operations);

    writer.engine.start()?;
    latecomer.engine.start()?;

    let outcome = writer.engine.trigger_sync().await;
    info!(device_id = %writer.device_id, ?outcome, "writer cycle finished");

    // First cycle conflicts and catches up; the second pushes.
    for _ in 0..2 {
        let outcome = latecomer.engine.trigger_sync().await;
        info!(device_id = %latecomer.device_id, ?outcome, "latecomer cycle finished");
    }

    writer.engine.stop();
    latecomer.engine.stop();

    Ok(SimulationReport {
        project_id: project_id.to_string(),
        server_version: server.version(project_id),
        server_operations: server.operation_count(project_id),
        devices: vec![writer.report(), latecomer.report()],
    })
}

fn print_text(report: &SimulationReport) {
    println!("Plotsync Simulation");
    println!("===================");
    println!("Project: {}", report.project_id);
    println!(
        "Server: version {}, {} operations",
        report.server_version, report.server_operations
    );

    for device in &report.devices {
        println!();
        println!("Device {}", device.device_id);
        println!("  Sync version:      {}", device.sync_version);
        println!("  Processed:         {}", device.operations_processed);
        println!("  Successful syncs:  {}", device.successful_syncs);
        println!("  Failed syncs:      {}", device.failed_syncs);
        println!("  Catch-ups:         {}", device.catch_ups);
        println!("  Received:          {}", device.operations_received);
        println!("  Pending:           {}", device.pending_operations);
    }
}
