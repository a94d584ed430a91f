//! Integration tests for sync engine and server.

use parking_lot::Mutex;
use plotsync_engine::{
    version_key, CycleOutcome, EventKind, HttpTransport, LoopbackClient, MemoryOperationStore,
    MemoryVersionStore, SkipReason, SyncConfig, SyncEngine, SyncEvent, SyncStatus, VersionStore,
};
use plotsync_server::{AuthConfig, ServerConfig, SyncServer, TokenValidator};
use plotsync_testkit::{
    sample_operation, shared_server, GatedNetwork, TempVersionStore, TestDevice, TEST_PROJECT,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn client_server_full_sync() {
    let server = shared_server(ServerConfig::default());
    let laptop = TestDevice::connect(&server, TEST_PROJECT, "laptop", SyncConfig::default());

    laptop.enqueue(3);
    laptop.engine.start().unwrap();
    let outcome = laptop.engine.trigger_sync().await;

    assert!(outcome.data_fully_synced());
    assert_eq!(server.version(TEST_PROJECT), 3);
    assert_eq!(laptop.engine.sync_version(), 3);
    assert!(laptop.storage.pending_ids().is_empty());
    assert_eq!(
        laptop.versions.load(&version_key(TEST_PROJECT)).unwrap(),
        Some(3)
    );
}

#[tokio::test]
async fn second_device_catches_up_then_pushes() {
    let server = shared_server(ServerConfig::default());
    let laptop = TestDevice::connect(&server, TEST_PROJECT, "laptop", SyncConfig::default());
    let tablet = TestDevice::connect(&server, TEST_PROJECT, "tablet", SyncConfig::default());

    laptop.enqueue(3);
    laptop.engine.start().unwrap();
    laptop.engine.trigger_sync().await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    tablet.engine.on(EventKind::ServerOperationsReceived, move |event| {
        if let SyncEvent::ServerOperationsReceived { operations, .. } = event {
            sink.lock().extend(operations.iter().map(|op| op.device_id.clone()));
        }
    });

    let local = tablet.enqueue(1);
    tablet.engine.start().unwrap();

    let first = tablet.engine.trigger_sync().await;
    assert_eq!(first.report().unwrap().caught_up_to, Some(3));
    assert_eq!(tablet.storage.pending_ids(), local);
    assert_eq!(*received.lock(), vec!["laptop"; 3]);

    let second = tablet.engine.trigger_sync().await;
    assert!(second.data_fully_synced());
    assert_eq!(server.version(TEST_PROJECT), 4);
    assert_eq!(tablet.engine.sync_version(), 4);

    let stats = tablet.engine.stats();
    assert_eq!(stats.catch_ups, 1);
    assert_eq!(stats.successful_syncs, 1);
    assert_eq!(stats.failed_syncs, 0);
}

#[tokio::test]
async fn signed_tokens_gate_access() {
    let auth = AuthConfig::new(b"integration-secret".to_vec());
    let token = TokenValidator::new(auth.clone())
        .create_token("laptop", TEST_PROJECT)
        .unwrap();
    let server = shared_server(ServerConfig::new().with_auth(auth));

    let trusted = TestDevice::connect_with_token(
        &server,
        TEST_PROJECT,
        "laptop",
        SyncConfig::default(),
        Some(token.clone()),
    );
    trusted.enqueue(1);
    trusted.engine.start().unwrap();
    assert!(trusted.engine.trigger_sync().await.data_fully_synced());

    let impostor = TestDevice::connect_with_token(
        &server,
        TEST_PROJECT,
        "tablet",
        SyncConfig::default(),
        Some(token),
    );
    impostor.enqueue(1);
    impostor.engine.start().unwrap();
    impostor.engine.trigger_sync().await;

    assert_eq!(impostor.engine.status(), SyncStatus::Stopped);
    assert_eq!(impostor.storage.pending_ids().len(), 1);
    assert_eq!(server.version(TEST_PROJECT), 1);
}

#[tokio::test]
async fn offline_cycles_are_silent() {
    let server = shared_server(ServerConfig::default());
    let laptop = TestDevice::connect(&server, TEST_PROJECT, "laptop", SyncConfig::default());
    laptop.enqueue(2);
    laptop.engine.start().unwrap();

    laptop.transport.client().set_healthy(false);
    assert_eq!(
        laptop.engine.trigger_sync().await,
        CycleOutcome::Skipped(SkipReason::Offline)
    );
    assert_eq!(laptop.engine.stats().failed_syncs, 0);

    laptop.transport.client().set_healthy(true);
    assert!(laptop.engine.trigger_sync().await.data_fully_synced());
    assert_eq!(server.version(TEST_PROJECT), 2);
}

#[tokio::test]
async fn version_survives_restart() {
    let server = shared_server(ServerConfig::default());
    let temp = TempVersionStore::new();
    let storage = Arc::new(MemoryOperationStore::new());
    storage.enqueue(sample_operation(TEST_PROJECT, "laptop", 1));
    storage.enqueue(sample_operation(TEST_PROJECT, "laptop", 2));

    let connect = |versions| {
        SyncEngine::builder()
            .storage(Arc::clone(&storage))
            .network(Arc::new(HttpTransport::new(
                "http://sync.test",
                LoopbackClient::new(Arc::clone(&server)),
            )))
            .version_store(versions)
            .project_id(TEST_PROJECT)
            .device_id("laptop")
            .build()
            .unwrap()
    };

    let engine = connect(Arc::clone(&temp.store));
    engine.start().unwrap();
    engine.trigger_sync().await;
    engine.stop();

    let restarted = connect(Arc::new(temp.reopen()));
    assert_eq!(restarted.sync_version(), 2);
}

#[tokio::test]
async fn resend_after_discarded_success_is_idempotent() {
    let server = shared_server(ServerConfig::default());
    let transport = Arc::new(HttpTransport::new(
        "http://sync.test",
        LoopbackClient::new(Arc::clone(&server)),
    ));
    let gated = Arc::new(GatedNetwork::new(transport));
    let storage = Arc::new(MemoryOperationStore::new());
    storage.enqueue(sample_operation(TEST_PROJECT, "laptop", 1));
    let engine = SyncEngine::new(
        SyncConfig::default(),
        TEST_PROJECT,
        "laptop",
        Arc::clone(&storage),
        Arc::clone(&gated),
        Arc::new(MemoryVersionStore::new()),
    )
    .unwrap();

    engine.start().unwrap();
    let cycle = engine.spawn_sync();
    gated.wait_for_calls(1).await;
    engine.stop();
    gated.release(1);
    assert!(cycle.await.unwrap().report().unwrap().discarded);

    assert_eq!(server.version(TEST_PROJECT), 1);
    assert_eq!(storage.pending_ids(), vec![1]);

    engine.start().unwrap();
    gated.release(1);
    assert!(engine.trigger_sync().await.data_fully_synced());
    assert_eq!(server.version(TEST_PROJECT), 1);
    assert_eq!(server.operation_count(TEST_PROJECT), 1);
    assert_eq!(engine.sync_version(), 1);
}

#[tokio::test(start_paused = true)]
async fn timer_syncs_in_background() {
    let server: Arc<SyncServer> = shared_server(ServerConfig::default());
    let laptop = TestDevice::connect(
        &server,
        TEST_PROJECT,
        "laptop",
        SyncConfig::new().with_sync_interval(Duration::from_secs(10)),
    );
    laptop.engine.start().unwrap();

    laptop.enqueue(2);
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(server.version(TEST_PROJECT), 2);

    laptop.enqueue(1);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.version(TEST_PROJECT), 3);

    laptop.engine.pause().unwrap();
    laptop.enqueue(1);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.version(TEST_PROJECT), 3);

    laptop.engine.resume().unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.version(TEST_PROJECT), 4);
}
