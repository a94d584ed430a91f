//! Operation store wrappers for concurrency tests.

use crate::network::Gate;
use async_trait::async_trait;
use plotsync_engine::{OperationStore, SyncResult};
use plotsync_protocol::Operation;
use std::sync::Arc;

/// Holds every `delete_operations` call until the test releases it.
pub struct GatedStore<S> {
    inner: Arc<S>,
    gate: Gate,
}

impl<S: OperationStore> GatedStore<S> {
    /// Wraps `inner` with a closed gate.
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            gate: Gate::new(),
        }
    }

    /// Lets `count` held or future deletes proceed.
    pub fn release(&self, count: usize) {
        self.gate.release(count);
    }

    /// Waits until at least `count` deletes have entered.
    pub async fn wait_for_deletes(&self, count: usize) {
        self.gate.wait_for_calls(count).await;
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }
}

#[async_trait]
impl<S: OperationStore + 'static> OperationStore for GatedStore<S> {
    async fn get_pending_operations(&self, limit: usize) -> SyncResult<Vec<Operation>> {
        self.inner.get_pending_operations(limit).await
    }

    async fn delete_operations(&self, ids: &[i64]) -> SyncResult<()> {
        self.gate.pass(self.inner.delete_operations(ids)).await
    }

    async fn get_operations_count(&self) -> SyncResult<usize> {
        self.inner.get_operations_count().await
    }
}
