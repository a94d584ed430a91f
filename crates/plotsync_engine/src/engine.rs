//! The sync engine: lifecycle, timer and the batch-drain cycle.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, EventKind, Subscription, SyncEvent, SyncSummary};
use crate::state::{CycleOutcome, CycleReport, SkipReason, SyncStats, SyncStatus};
use crate::store::OperationStore;
use crate::transport::SyncNetwork;
use crate::version::{version_key, VersionStore};
use parking_lot::{Mutex, RwLock};
use plotsync_protocol::{BatchResult, Operation};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Message emitted with [`SyncEvent::SyncFailed`] when the session is rejected.
pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed. Please log in again.";

/// Builder for [`SyncEngine`].
///
/// Every collaborator and both identifiers are required; [`build`](Self::build)
/// fails immediately when one is missing or the configuration is invalid.
#[derive(Default)]
pub struct SyncEngineBuilder {
    storage: Option<Arc<dyn OperationStore>>,
    network: Option<Arc<dyn SyncNetwork>>,
    versions: Option<Arc<dyn VersionStore>>,
    project_id: Option<String>,
    device_id: Option<String>,
    config: SyncConfig,
}

impl SyncEngineBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local pending-operation queue.
    pub fn storage<S: OperationStore + 'static>(mut self, storage: Arc<S>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the network collaborator.
    pub fn network<N: SyncNetwork + 'static>(mut self, network: Arc<N>) -> Self {
        self.network = Some(network);
        self
    }

    /// Sets the persisted version store.
    pub fn version_store<V: VersionStore + 'static>(mut self, versions: Arc<V>) -> Self {
        self.versions = Some(versions);
        self
    }

    /// Sets the project this engine replicates.
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Sets the local device identifier.
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates inputs, loads the persisted version and returns a stopped engine.
    ///
    /// # Errors
    ///
    /// - [`SyncError::MissingDependency`] for a missing collaborator or an
    ///   empty identifier
    /// - [`SyncError::InvalidConfig`] if the configuration fails validation
    /// - [`SyncError::VersionStore`] if the persisted version cannot be read
    pub fn build(self) -> SyncResult<SyncEngine> {
        let storage = self.storage.ok_or(SyncError::MissingDependency("storage"))?;
        let network = self.network.ok_or(SyncError::MissingDependency("network"))?;
        let versions = self
            .versions
            .ok_or(SyncError::MissingDependency("version store"))?;
        let project_id = self
            .project_id
            .filter(|id| !id.is_empty())
            .ok_or(SyncError::MissingDependency("project id"))?;
        let device_id = self
            .device_id
            .filter(|id| !id.is_empty())
            .ok_or(SyncError::MissingDependency("device id"))?;
        self.config.validate()?;

        let version_key = version_key(&project_id);
        let sync_version = versions.load(&version_key)?.unwrap_or(0);

        info!(
            project_id = %project_id,
            device_id = %device_id,
            sync_version,
            batch_size = self.config.batch_size,
            "sync engine created"
        );

        let stats = SyncStats {
            sync_version,
            ..SyncStats::default()
        };

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                project_id,
                device_id,
                config: self.config,
                storage,
                network,
                versions,
                version_key,
                status: RwLock::new(SyncStatus::Stopped),
                stats: RwLock::new(stats),
                events: EventBus::new(),
                busy: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                timer: Mutex::new(None),
                last_failure_at: Mutex::new(None),
            }),
        })
    }
}

/// Keeps a project's local operation queue consistent with the server log.
///
/// One engine serves one project on one device. Cloning is cheap and every
/// clone drives the same engine.
///
/// # Lifecycle
///
/// [`start`](Self::start) arms a recurring timer that runs one sync cycle
/// per tick; [`trigger_sync`](Self::trigger_sync) runs one on demand. At most
/// one cycle runs at a time: an overlapping trigger is coalesced into
/// [`SkipReason::Busy`].
///
/// # Example
///
/// ```ignore
/// let engine = SyncEngine::builder()
///     .storage(queue)
///     .network(transport)
///     .version_store(versions)
///     .project_id("story-1")
///     .device_id("laptop")
///     .build()?;
///
/// engine.on(EventKind::ServerOperationsReceived, |event| { /* fold into editor state */ });
/// engine.start()?;
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    project_id: String,
    device_id: String,
    config: SyncConfig,
    storage: Arc<dyn OperationStore>,
    network: Arc<dyn SyncNetwork>,
    versions: Arc<dyn VersionStore>,
    version_key: String,
    status: RwLock<SyncStatus>,
    stats: RwLock<SyncStats>,
    events: EventBus,
    busy: AtomicBool,
    /// Bumped by every start and stop; a cycle that sees it change drops its results.
    generation: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
    last_failure_at: Mutex<Option<Instant>>,
}

/// How the engine reads one network exchange.
enum Exchange {
    Acknowledged(BatchResult),
    Conflict { server_version: u64 },
    Failed(SyncError),
}

impl Exchange {
    fn classify(response: SyncResult<BatchResult>, local_version: u64) -> Self {
        match response {
            Ok(result) if result.success => Exchange::Acknowledged(result),
            Ok(result) if result.indicates_version_ahead(local_version) => Exchange::Conflict {
                server_version: result.sync_version,
            },
            Ok(result) => Exchange::Failed(SyncError::Rejected(result.error_message())),
            Err(SyncError::VersionConflict { server_version }) => {
                Exchange::Conflict { server_version }
            }
            Err(err) => Exchange::Failed(err),
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    /// Returns a builder.
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    /// Creates an engine from all of its parts.
    ///
    /// # Errors
    ///
    /// See [`SyncEngineBuilder::build`].
    pub fn new<S, N, V>(
        config: SyncConfig,
        project_id: impl Into<String>,
        device_id: impl Into<String>,
        storage: Arc<S>,
        network: Arc<N>,
        versions: Arc<V>,
    ) -> SyncResult<Self>
    where
        S: OperationStore + 'static,
        N: SyncNetwork + 'static,
        V: VersionStore + 'static,
    {
        SyncEngineBuilder::new()
            .config(config)
            .project_id(project_id)
            .device_id(device_id)
            .storage(storage)
            .network(network)
            .version_store(versions)
            .build()
    }

    /// Arms the recurring timer and moves to `running`.
    ///
    /// Allowed from `stopped`, and from `error` to restart after retries were
    /// exhausted (the retry count is reset).
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidStateTransition`] if already running or paused
    /// - [`SyncError::NoRuntime`] outside a Tokio runtime
    pub fn start(&self) -> SyncResult<()> {
        self.inner.start()
    }

    /// Cancels the timer and moves to `stopped` from any status.
    ///
    /// No cycle starts after this returns. A cycle already awaiting the
    /// network finishes its call but discards the result.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Moves from `running` to `paused`. Triggers become successful no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] unless running.
    pub fn pause(&self) -> SyncResult<()> {
        self.inner
            .transition(SyncStatus::Running, SyncStatus::Paused)
    }

    /// Moves from `paused` back to `running`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] unless paused.
    pub fn resume(&self) -> SyncResult<()> {
        self.inner
            .transition(SyncStatus::Paused, SyncStatus::Running)
    }

    /// Runs one sync cycle now.
    ///
    /// Never fails for expected conditions: offline, failures, conflicts and
    /// authentication errors are reported through stats and events. See
    /// [`CycleOutcome::ran_without_fatal_error`] and
    /// [`CycleOutcome::data_fully_synced`].
    pub async fn trigger_sync(&self) -> CycleOutcome {
        self.inner.run_cycle().await
    }

    /// Runs one sync cycle on a background task.
    ///
    /// For callers that must not wait, such as a UI thread.
    pub fn spawn_sync(&self) -> JoinHandle<CycleOutcome> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_cycle().await })
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> SyncStatus {
        *self.inner.status.read()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns the local sync version.
    pub fn sync_version(&self) -> u64 {
        self.inner.current_version()
    }

    /// Returns the project id.
    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// Returns the device id.
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Registers a handler for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    /// Registers a handler for every event.
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.events.on_any(handler)
    }

    /// Returns a receiver of every future event.
    pub fn subscribe_channel(&self) -> tokio::sync::mpsc::UnboundedReceiver<SyncEvent> {
        self.inner.events.subscribe_channel()
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("project_id", &self.inner.project_id)
            .field("device_id", &self.inner.device_id)
            .field("status", &self.status())
            .field("sync_version", &self.sync_version())
            .finish()
    }
}

impl EngineInner {
    fn status(&self) -> SyncStatus {
        *self.status.read()
    }

    fn current_version(&self) -> u64 {
        self.stats.read().sync_version
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn emit_status(&self, previous: SyncStatus, next: SyncStatus) {
        info!(project_id = %self.project_id, %previous, %next, "sync status changed");
        self.events.emit(SyncEvent::StatusChanged { previous, next });
    }

    fn start(self: &Arc<Self>) -> SyncResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;

        let previous = {
            let mut status = self.status.write();
            if !status.can_start() {
                return Err(SyncError::InvalidStateTransition {
                    from: status.to_string(),
                    to: SyncStatus::Running.to_string(),
                });
            }
            std::mem::replace(&mut *status, SyncStatus::Running)
        };

        if previous == SyncStatus::Error {
            self.clear_retry_state();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let timer = runtime.spawn(run_timer(
            Arc::downgrade(self),
            generation,
            self.config.sync_interval,
        ));
        if let Some(stale) = self.timer.lock().replace(timer) {
            stale.abort();
        }

        self.emit_status(previous, SyncStatus::Running);
        Ok(())
    }

    fn stop(&self) {
        let previous = std::mem::replace(&mut *self.status.write(), SyncStatus::Stopped);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        if previous != SyncStatus::Stopped {
            self.emit_status(previous, SyncStatus::Stopped);
        }
    }

    fn transition(&self, from: SyncStatus, to: SyncStatus) -> SyncResult<()> {
        {
            let mut status = self.status.write();
            if *status != from {
                return Err(SyncError::InvalidStateTransition {
                    from: status.to_string(),
                    to: to.to_string(),
                });
            }
            *status = to;
        }
        self.emit_status(from, to);
        Ok(())
    }

    fn enter_error_state(&self) {
        let previous = {
            let mut status = self.status.write();
            if !status.has_timer() {
                return;
            }
            std::mem::replace(&mut *status, SyncStatus::Error)
        };
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        self.emit_status(previous, SyncStatus::Error);
    }

    fn clear_retry_state(&self) {
        self.stats.write().current_retry_count = 0;
        *self.last_failure_at.lock() = None;
    }

    fn in_backoff(&self) -> bool {
        let retries = self.stats.read().current_retry_count;
        match *self.last_failure_at.lock() {
            Some(at) if retries > 0 => at.elapsed() < self.config.retry_spacing(retries),
            _ => false,
        }
    }

    async fn run_cycle(&self) -> CycleOutcome {
        match self.status() {
            SyncStatus::Stopped => return CycleOutcome::Skipped(SkipReason::Stopped),
            SyncStatus::Error => return CycleOutcome::Skipped(SkipReason::Errored),
            SyncStatus::Paused => return CycleOutcome::Skipped(SkipReason::Paused),
            SyncStatus::Running => {}
        }

        if !self.network.is_online() {
            debug!(project_id = %self.project_id, "offline, skipping sync cycle");
            return CycleOutcome::Skipped(SkipReason::Offline);
        }

        if self.in_backoff() {
            debug!(project_id = %self.project_id, "retry spacing not elapsed, skipping");
            return CycleOutcome::Skipped(SkipReason::Backoff);
        }

        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!(project_id = %self.project_id, "sync cycle already in flight");
            return CycleOutcome::Skipped(SkipReason::Busy);
        };

        let generation = self.generation.load(Ordering::SeqCst);
        let span = info_span!(
            "sync_cycle",
            project_id = %self.project_id,
            device_id = %self.device_id
        );
        let report = self.drain(generation).instrument(span).await;
        CycleOutcome::Completed(report)
    }

    /// Sends batches until the queue is empty, a conflict is handled or a
    /// failure is recorded.
    async fn drain(&self, generation: u64) -> CycleReport {
        let mut report = CycleReport::default();

        loop {
            if !self.is_current(generation) {
                report.discarded = true;
                break;
            }
            if self.status() != SyncStatus::Running {
                debug!("paused mid-cycle, leaving remaining batches");
                break;
            }

            let pending = self
                .storage
                .get_pending_operations(self.config.batch_size)
                .await;
            if !self.is_current(generation) {
                report.discarded = true;
                break;
            }
            let batch = match pending {
                Ok(batch) => batch,
                Err(err) => {
                    self.record_failure(err, &mut report);
                    break;
                }
            };
            if batch.is_empty() {
                debug!("no pending operations");
                break;
            }

            let local_version = self.current_version();
            debug!(
                operations = batch.len(),
                local_version, "sending batch"
            );
            let response = self
                .network
                .send_operations(&self.project_id, &self.device_id, local_version, &batch)
                .await;

            if !self.is_current(generation) {
                info!("engine stopped while sending, discarding response");
                report.discarded = true;
                break;
            }

            match Exchange::classify(response, local_version) {
                Exchange::Acknowledged(result) => match self
                    .acknowledge(generation, &batch, result)
                    .await
                {
                    Ok(None) => {
                        report.discarded = true;
                        break;
                    }
                    Ok(Some(processed)) => {
                        report.batches += 1;
                        report.processed += processed;
                        if processed == 0 {
                            warn!(
                                operations = batch.len(),
                                "server acknowledged none of the batch, ending cycle"
                            );
                            break;
                        }
                    }
                    Err(err) => {
                        self.record_failure(err, &mut report);
                        break;
                    }
                },
                Exchange::Conflict { server_version } => {
                    match self.catch_up(generation, local_version, server_version).await {
                        Ok(Some(version)) => report.caught_up_to = Some(version),
                        Ok(None) => report.discarded = true,
                        Err(err) => self.record_failure(err, &mut report),
                    }
                    break;
                }
                Exchange::Failed(err) => {
                    self.record_failure(err, &mut report);
                    break;
                }
            }
        }

        if report.failure.is_none() && !report.discarded {
            self.clear_retry_state();
        }

        match self.storage.get_operations_count().await {
            Ok(pending) => {
                report.pending = pending;
                if self.is_current(generation) {
                    self.stats.write().pending_operations = pending;
                }
            }
            Err(err) => warn!(error = %err, "could not count pending operations"),
        }

        report
    }

    /// Deletes the acknowledged part of `batch` and advances the version.
    ///
    /// Returns `None` if the engine was stopped while storage or the version
    /// store was busy.
    async fn acknowledge(
        &self,
        generation: u64,
        batch: &[Operation],
        result: BatchResult,
    ) -> SyncResult<Option<usize>> {
        let sent: HashSet<i64> = batch.iter().map(|op| op.id).collect();
        let (acknowledged, stray): (Vec<i64>, Vec<i64>) = result
            .processed_operations
            .iter()
            .copied()
            .partition(|id| sent.contains(id));
        if !stray.is_empty() {
            warn!(?stray, "server acknowledged ids that were not in the batch");
        }

        if !acknowledged.is_empty() {
            let deleted = self.storage.delete_operations(&acknowledged).await;
            if !self.is_current(generation) {
                info!("engine stopped while deleting, discarding acknowledgment");
                return Ok(None);
            }
            deleted?;
        }
        let advanced = self.advance_version(result.sync_version).await;
        if !self.is_current(generation) {
            return Ok(None);
        }
        advanced?;

        let sync_version = {
            let mut stats = self.stats.write();
            stats.total_operations_processed += acknowledged.len() as u64;
            stats.successful_syncs += 1;
            stats.last_sync_time = Some(now_millis());
            stats.sync_version
        };
        self.clear_retry_state();

        info!(
            processed = acknowledged.len(),
            sync_version, "batch acknowledged"
        );
        self.events.emit(SyncEvent::SyncCompleted(SyncSummary {
            processed: acknowledged.len(),
            sync_version,
            errors: result.errors.unwrap_or_default(),
        }));

        Ok(Some(acknowledged.len()))
    }

    /// Fetches what the server accepted since `local_version`.
    ///
    /// Local pending operations are left untouched; the next cycle re-sends
    /// them against the corrected version. Returns `None` if the engine was
    /// stopped while fetching.
    async fn catch_up(
        &self,
        generation: u64,
        local_version: u64,
        server_version: u64,
    ) -> SyncResult<Option<u64>> {
        warn!(
            "Version mismatch detected. Client: {}, Server: {}. Starting catch-up...",
            local_version, server_version
        );

        let fetched = self
            .network
            .get_operations(&self.project_id, local_version)
            .await;

        if !self.is_current(generation) {
            info!("engine stopped during catch-up, discarding server operations");
            return Ok(None);
        }
        let result = fetched?;
        if !result.success {
            return Err(SyncError::Rejected(result.error_message()));
        }

        let operations = result.server_operations.unwrap_or_default();
        let advanced = self.advance_version(result.sync_version).await;
        if !self.is_current(generation) {
            return Ok(None);
        }
        advanced?;

        let sync_version = {
            let mut stats = self.stats.write();
            stats.catch_ups += 1;
            stats.sync_version
        };
        self.clear_retry_state();

        info!(
            operations = operations.len(),
            sync_version, "catch-up complete"
        );
        self.events.emit(SyncEvent::ServerOperationsReceived {
            operations,
            sync_version,
        });

        Ok(Some(sync_version))
    }

    /// Persists `candidate` if it is newer than the local version.
    ///
    /// The write runs on the blocking pool; the new value is published to
    /// stats only once it is durable.
    async fn advance_version(&self, candidate: u64) -> SyncResult<()> {
        let current = self.current_version();
        if candidate <= current {
            return Ok(());
        }

        let versions = Arc::clone(&self.versions);
        let key = self.version_key.clone();
        tokio::task::spawn_blocking(move || versions.store(&key, candidate))
            .await
            .map_err(|e| SyncError::VersionStore(format!("version write task failed: {e}")))??;

        let mut stats = self.stats.write();
        if candidate > stats.sync_version {
            debug!(from = stats.sync_version, to = candidate, "sync version advanced");
            stats.sync_version = candidate;
        }
        Ok(())
    }

    fn record_failure(&self, err: SyncError, report: &mut CycleReport) {
        let message = err.to_string();
        report.failure = Some(message.clone());

        let retry_count = {
            let mut stats = self.stats.write();
            stats.failed_syncs += 1;
            stats.last_error = Some(message.clone());
            stats.last_error_time = Some(now_millis());
            stats.current_retry_count += 1;
            stats.current_retry_count
        };
        *self.last_failure_at.lock() = Some(Instant::now());

        if err.is_authentication() {
            error!(error = %message, "session rejected, stopping sync");
            self.stop();
            self.events.emit(SyncEvent::SyncFailed {
                message: AUTH_FAILED_MESSAGE.to_string(),
                details: message,
            });
            return;
        }

        if !err.is_retryable() || retry_count > self.config.max_retries {
            error!(
                error = %message,
                retry_count,
                max_retries = self.config.max_retries,
                "giving up on sync"
            );
            self.enter_error_state();
            self.events.emit(SyncEvent::SyncFailed {
                message,
                details: format!(
                    "{retry_count} consecutive failures (max retries {})",
                    self.config.max_retries
                ),
            });
            return;
        }

        warn!(
            error = %message,
            retry_count,
            max_retries = self.config.max_retries,
            "sync cycle failed, will retry"
        );
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Fires a cycle every `period` until the engine is dropped or restarted.
///
/// Each cycle runs on its own task, so aborting the timer never cuts a
/// network call short.
async fn run_timer(engine: Weak<EngineInner>, generation: u64, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(engine) = engine.upgrade() else {
            break;
        };
        if !engine.is_current(generation) {
            break;
        }
        tokio::spawn(async move {
            engine.run_cycle().await;
        });
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryOperationStore;
    use crate::transport::MockNetwork;
    use crate::version::MemoryVersionStore;
    use serde_json::json;

    struct Harness {
        engine: SyncEngine,
        storage: Arc<MemoryOperationStore>,
        network: Arc<MockNetwork>,
        versions: Arc<MemoryVersionStore>,
    }

    fn harness(config: SyncConfig) -> Harness {
        let storage = Arc::new(MemoryOperationStore::new());
        let network = Arc::new(MockNetwork::new());
        let versions = Arc::new(MemoryVersionStore::with_value(version_key("story"), 100));
        let engine = SyncEngine::new(
            config,
            "story",
            "laptop",
            Arc::clone(&storage),
            Arc::clone(&network),
            Arc::clone(&versions),
        )
        .unwrap();
        Harness {
            engine,
            storage,
            network,
            versions,
        }
    }

    fn op(n: i64) -> Operation {
        Operation::new("node.update", "story", "main", "base", json!({"n": n}), n, "laptop")
    }

    #[test]
    fn builder_requires_every_dependency() {
        let err = SyncEngine::builder().build().unwrap_err();
        assert_eq!(err, SyncError::MissingDependency("storage"));

        let err = SyncEngine::builder()
            .storage(Arc::new(MemoryOperationStore::new()))
            .network(Arc::new(MockNetwork::new()))
            .version_store(Arc::new(MemoryVersionStore::new()))
            .project_id("")
            .device_id("laptop")
            .build()
            .unwrap_err();
        assert_eq!(err, SyncError::MissingDependency("project id"));

        let err = SyncEngine::builder()
            .storage(Arc::new(MemoryOperationStore::new()))
            .network(Arc::new(MockNetwork::new()))
            .version_store(Arc::new(MemoryVersionStore::new()))
            .project_id("story")
            .build()
            .unwrap_err();
        assert_eq!(err, SyncError::MissingDependency("device id"));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let result = SyncEngine::new(
            SyncConfig::new().with_batch_size(0),
            "story",
            "laptop",
            Arc::new(MemoryOperationStore::new()),
            Arc::new(MockNetwork::new()),
            Arc::new(MemoryVersionStore::new()),
        );
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn loads_persisted_version() {
        let h = harness(SyncConfig::default());
        assert_eq!(h.engine.sync_version(), 100);
        assert_eq!(h.engine.stats().sync_version, 100);
        assert_eq!(h.engine.status(), SyncStatus::Stopped);
    }

    #[test]
    fn start_requires_runtime() {
        let h = harness(SyncConfig::default());
        assert_eq!(h.engine.start(), Err(SyncError::NoRuntime));
        assert_eq!(h.engine.status(), SyncStatus::Stopped);
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let h = harness(SyncConfig::default());
        let mut events = h.engine.subscribe_channel();

        h.engine.start().unwrap();
        assert!(matches!(
            h.engine.start(),
            Err(SyncError::InvalidStateTransition { .. })
        ));
        h.engine.pause().unwrap();
        assert!(h.engine.pause().is_err());
        h.engine.resume().unwrap();
        h.engine.stop();
        h.engine.stop();

        let mut transitions = Vec::new();
        while let Ok(SyncEvent::StatusChanged { previous, next }) = events.try_recv() {
            transitions.push((previous, next));
        }
        assert_eq!(
            transitions,
            vec![
                (SyncStatus::Stopped, SyncStatus::Running),
                (SyncStatus::Running, SyncStatus::Paused),
                (SyncStatus::Paused, SyncStatus::Running),
                (SyncStatus::Running, SyncStatus::Stopped),
            ]
        );
    }

    #[tokio::test]
    async fn stopped_engine_refuses_triggers() {
        let h = harness(SyncConfig::default());
        h.storage.enqueue(op(1));

        let outcome = h.engine.trigger_sync().await;
        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Stopped));
        assert!(!outcome.ran_without_fatal_error());
        assert_eq!(h.network.send_count(), 0);
    }

    #[tokio::test]
    async fn paused_trigger_is_successful_no_op() {
        let h = harness(SyncConfig::default());
        h.storage.enqueue(op(1));
        h.engine.start().unwrap();
        h.engine.pause().unwrap();

        let outcome = h.engine.trigger_sync().await;
        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Paused));
        assert!(outcome.ran_without_fatal_error());
        assert_eq!(h.network.send_count(), 0);
    }

    #[tokio::test]
    async fn offline_is_not_a_failure() {
        let h = harness(SyncConfig::default());
        h.storage.enqueue(op(1));
        h.network.set_online(false);
        h.engine.start().unwrap();

        let outcome = h.engine.trigger_sync().await;
        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Offline));
        let stats = h.engine.stats();
        assert_eq!(stats.failed_syncs, 0);
        assert_eq!(stats.current_retry_count, 0);
    }

    #[tokio::test]
    async fn success_drains_and_advances_version() {
        let h = harness(SyncConfig::new().with_batch_size(2));
        for n in 1..=3 {
            h.storage.enqueue(op(n));
        }
        h.network.push_response(Ok(BatchResult::success(vec![1, 2], 102)));
        h.network.push_response(Ok(BatchResult::success(vec![3], 103)));
        h.engine.start().unwrap();

        let outcome = h.engine.trigger_sync().await;
        assert!(outcome.data_fully_synced());
        let report = outcome.report().unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.processed, 3);

        assert_eq!(h.network.sent_batches(), vec![vec![1, 2], vec![3]]);
        assert!(h.storage.pending_ids().is_empty());
        assert_eq!(h.engine.sync_version(), 103);
        assert_eq!(h.versions.load(&version_key("story")).unwrap(), Some(103));

        let stats = h.engine.stats();
        assert_eq!(stats.successful_syncs, 2);
        assert_eq!(stats.total_operations_processed, 3);
        assert_eq!(stats.pending_operations, 0);
        assert!(stats.last_sync_time.is_some());
    }

    #[tokio::test]
    async fn stale_version_is_not_persisted() {
        let h = harness(SyncConfig::default());
        h.storage.enqueue(op(1));
        h.network.push_response(Ok(BatchResult::success(vec![1], 90)));
        h.engine.start().unwrap();

        h.engine.trigger_sync().await;
        assert_eq!(h.engine.sync_version(), 100);
        assert!(h.versions.writes().is_empty());
        assert!(h.storage.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn stray_acknowledgments_are_ignored() {
        let h = harness(SyncConfig::default());
        h.storage.enqueue(op(1));
        h.storage.enqueue_with_id(op(9).with_id(50));
        h.network
            .push_response(Ok(BatchResult::success(vec![1, 777], 101)));
        h.network.push_response(Ok(BatchResult::success(vec![50], 102)));
        h.engine.start().unwrap();

        let outcome = h.engine.trigger_sync().await;
        assert_eq!(outcome.report().unwrap().processed, 2);
        assert_eq!(h.engine.stats().total_operations_processed, 2);
    }

    #[tokio::test]
    async fn nothing_acknowledged_ends_the_cycle() {
        let h = harness(SyncConfig::default());
        h.storage.enqueue(op(1));
        h.network.set_push_response(Ok(BatchResult::success(vec![], 100)));
        h.engine.start().unwrap();

        let outcome = h.engine.trigger_sync().await;
        assert_eq!(h.network.send_count(), 1);
        assert_eq!(outcome.report().unwrap().pending, 1);
        assert!(!outcome.data_fully_synced());
    }

    #[tokio::test]
    async fn explicit_conflict_signal_triggers_catch_up() {
        let h = harness(SyncConfig::default());
        h.storage.enqueue(op(1));
        h.network
            .push_response(Err(SyncError::VersionConflict { server_version: 120 }));
        h.network
            .catch_up_response(Ok(BatchResult::catch_up(vec![op(5).with_id(5)], 120)));
        h.engine.start().unwrap();

        let outcome = h.engine.trigger_sync().await;
        assert_eq!(outcome.report().unwrap().caught_up_to, Some(120));
        assert_eq!(h.network.catch_up_calls(), vec![100]);
        assert_eq!(h.storage.pending_ids(), vec![1]);
        assert_eq!(h.engine.stats().catch_ups, 1);
        assert_eq!(h.engine.stats().failed_syncs, 0);
    }

    #[tokio::test]
    async fn rejection_without_newer_version_is_a_failure() {
        let h = harness(SyncConfig::default());
        h.storage.enqueue(op(1));
        h.network
            .push_response(Ok(BatchResult::failure(vec!["quota exceeded".into()], 100)));
        h.engine.start().unwrap();

        let outcome = h.engine.trigger_sync().await;
        assert!(outcome.ran_without_fatal_error());
        let report = outcome.report().unwrap();
        assert!(report.failure.as_deref().unwrap().contains("quota exceeded"));

        let stats = h.engine.stats();
        assert_eq!(stats.failed_syncs, 1);
        assert_eq!(stats.current_retry_count, 1);
        assert!(stats.last_error_time.is_some());
        assert_eq!(h.network.catch_up_calls(), Vec::<u64>::new());
        assert_eq!(h.engine.status(), SyncStatus::Running);
    }

    #[tokio::test]
    async fn storage_failure_is_recorded() {
        let h = harness(SyncConfig::default());
        h.storage.set_unavailable(Some("database is locked".into()));
        h.engine.start().unwrap();

        let outcome = h.engine.trigger_sync().await;
        assert!(outcome.ran_without_fatal_error());
        assert_eq!(h.engine.stats().failed_syncs, 1);
        assert_eq!(h.network.send_count(), 0);
    }

    #[tokio::test]
    async fn permanent_error_exhausts_immediately() {
        let h = harness(SyncConfig::new().with_max_retries(5));
        h.storage.enqueue(op(1));
        h.network
            .push_response(Err(SyncError::Protocol("undecodable response".into())));
        h.engine.start().unwrap();

        h.engine.trigger_sync().await;
        assert_eq!(h.engine.status(), SyncStatus::Error);
        assert_eq!(
            h.engine.trigger_sync().await,
            CycleOutcome::Skipped(SkipReason::Errored)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_spacing_is_respected() {
        let h = harness(
            SyncConfig::new()
                .with_retry_delay(Duration::from_secs(10))
                .with_max_retries(3),
        );
        h.storage.enqueue(op(1));
        h.network
            .push_response(Err(SyncError::transport_retryable("connection reset")));
        h.network.push_response(Ok(BatchResult::success(vec![1], 101)));
        h.engine.start().unwrap();

        h.engine.trigger_sync().await;
        assert_eq!(
            h.engine.trigger_sync().await,
            CycleOutcome::Skipped(SkipReason::Backoff)
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        let outcome = h.engine.trigger_sync().await;
        assert!(outcome.data_fully_synced());
        assert_eq!(h.engine.stats().current_retry_count, 0);
        assert_eq!(h.network.send_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_empty_cycle_resets_retry_count() {
        let h = harness(SyncConfig::default());
        h.storage.enqueue(op(1));
        h.network
            .push_response(Err(SyncError::transport_retryable("timeout")));
        h.engine.start().unwrap();

        h.engine.trigger_sync().await;
        assert_eq!(h.engine.stats().current_retry_count, 1);

        h.storage.delete_operations(&[1]).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(h.engine.trigger_sync().await.data_fully_synced());
        assert_eq!(h.engine.stats().current_retry_count, 0);
        assert_eq!(h.network.send_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_drives_cycles_until_stopped() {
        let h = harness(SyncConfig::new().with_sync_interval(Duration::from_secs(30)));
        h.network.set_push_response(Ok(BatchResult::success(vec![1], 101)));
        h.storage.enqueue(op(1));
        h.engine.start().unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.network.send_count(), 1);

        h.engine.stop();
        h.storage.enqueue(op(2));
        tokio::time::sleep(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.network.send_count(), 1);
    }
}
