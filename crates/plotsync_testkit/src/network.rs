//! Network wrappers for concurrency tests.

use async_trait::async_trait;
use plotsync_engine::{SyncNetwork, SyncResult};
use plotsync_protocol::{BatchResult, Operation};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

/// A closed gate that counts the calls waiting on it.
pub(crate) struct Gate {
    permits: Semaphore,
    entered: Notify,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
            entered: Notify::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Runs `call` once a permit is available.
    pub(crate) async fn pass<F: std::future::Future>(&self, call: F) -> F::Output {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_waiters();

        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
        let output = call.await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        output
    }

    pub(crate) fn release(&self, count: usize) {
        self.permits.add_permits(count);
    }

    pub(crate) async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.entered.notified();
            if self.calls.load(Ordering::SeqCst) >= count {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Which network call a [`GatedNetwork`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatedCall {
    /// `send_operations`.
    Send,
    /// `get_operations`.
    CatchUp,
}

/// Holds every call of one kind until the test releases it.
///
/// Tracks how many held calls are in flight at once, which is how tests
/// observe that an engine never overlaps cycles.
pub struct GatedNetwork<N> {
    inner: Arc<N>,
    holds: GatedCall,
    gate: Gate,
}

impl<N: SyncNetwork> GatedNetwork<N> {
    /// Wraps `inner`, holding `send_operations` calls.
    pub fn new(inner: Arc<N>) -> Self {
        Self::holding(inner, GatedCall::Send)
    }

    /// Wraps `inner`, holding calls of the given kind.
    pub fn holding(inner: Arc<N>, holds: GatedCall) -> Self {
        Self {
            inner,
            holds,
            gate: Gate::new(),
        }
    }

    /// Lets `count` held or future calls proceed.
    pub fn release(&self, count: usize) {
        self.gate.release(count);
    }

    /// Waits until at least `count` held calls have entered.
    pub async fn wait_for_calls(&self, count: usize) {
        self.gate.wait_for_calls(count).await;
    }

    /// Number of held calls so far.
    pub fn calls(&self) -> usize {
        self.gate.calls()
    }

    /// Highest number of simultaneous held calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.gate.max_in_flight()
    }

    /// Returns the wrapped network.
    pub fn inner(&self) -> &Arc<N> {
        &self.inner
    }
}

#[async_trait]
impl<N: SyncNetwork + 'static> SyncNetwork for GatedNetwork<N> {
    async fn send_operations(
        &self,
        project_id: &str,
        device_id: &str,
        known_version: u64,
        operations: &[Operation],
    ) -> SyncResult<BatchResult> {
        let call = self
            .inner
            .send_operations(project_id, device_id, known_version, operations);
        match self.holds {
            GatedCall::Send => self.gate.pass(call).await,
            GatedCall::CatchUp => call.await,
        }
    }

    async fn get_operations(
        &self,
        project_id: &str,
        since_version: u64,
    ) -> SyncResult<BatchResult> {
        let call = self.inner.get_operations(project_id, since_version);
        match self.holds {
            GatedCall::CatchUp => self.gate.pass(call).await,
            GatedCall::Send => call.await,
        }
    }

    fn is_online(&self) -> bool {
        self.inner.is_online()
    }
}
