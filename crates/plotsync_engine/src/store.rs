//! Local pending-operation queue.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use plotsync_protocol::Operation;
use std::collections::VecDeque;

/// Durable queue of operations the server has not acknowledged yet.
///
/// The engine only reads batches, deletes acknowledged ids and counts.
/// Enqueueing belongs to the editor and is not part of this trait.
///
/// # Invariants
///
/// - `get_pending_operations` returns oldest-first, at most `limit`
/// - `delete_operations` ignores ids that are not present
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Returns up to `limit` pending operations in insertion order.
    async fn get_pending_operations(&self, limit: usize) -> SyncResult<Vec<Operation>>;

    /// Removes acknowledged operations.
    async fn delete_operations(&self, ids: &[i64]) -> SyncResult<()>;

    /// Returns the number of pending operations.
    async fn get_operations_count(&self) -> SyncResult<usize>;
}

/// An in-memory operation queue.
///
/// Suitable for tests, the CLI simulator and ephemeral sessions.
#[derive(Debug)]
pub struct MemoryOperationStore {
    inner: Mutex<QueueState>,
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<Operation>,
    next_id: i64,
    unavailable: Option<String>,
    deletions: Vec<Vec<i64>>,
}

impl MemoryOperationStore {
    /// Creates an empty queue. The first enqueued operation gets id 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                pending: VecDeque::new(),
                next_id: 1,
                unavailable: None,
                deletions: Vec::new(),
            }),
        }
    }

    /// Appends an operation, assigning the next id.
    ///
    /// Returns the assigned id.
    pub fn enqueue(&self, operation: Operation) -> i64 {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.pending.push_back(operation.with_id(id));
        id
    }

    /// Appends an operation keeping the id it already carries.
    pub fn enqueue_with_id(&self, operation: Operation) {
        let mut state = self.inner.lock();
        state.next_id = state.next_id.max(operation.id + 1);
        state.pending.push_back(operation);
    }

    /// Returns the ids currently pending, oldest first.
    pub fn pending_ids(&self) -> Vec<i64> {
        self.inner.lock().pending.iter().map(|op| op.id).collect()
    }

    /// Ids passed to each successful `delete_operations` call, in order.
    pub fn delete_calls(&self) -> Vec<Vec<i64>> {
        self.inner.lock().deletions.clone()
    }

    /// Makes every call fail with the given message until cleared with `None`.
    pub fn set_unavailable(&self, reason: Option<String>) {
        self.inner.lock().unavailable = reason;
    }

    fn check_available(state: &QueueState) -> SyncResult<()> {
        match &state.unavailable {
            Some(reason) => Err(SyncError::Storage(reason.clone())),
            None => Ok(()),
        }
    }
}

impl Default for MemoryOperationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationStore for MemoryOperationStore {
    async fn get_pending_operations(&self, limit: usize) -> SyncResult<Vec<Operation>> {
        let state = self.inner.lock();
        Self::check_available(&state)?;
        Ok(state.pending.iter().take(limit).cloned().collect())
    }

    async fn delete_operations(&self, ids: &[i64]) -> SyncResult<()> {
        let mut state = self.inner.lock();
        Self::check_available(&state)?;
        state.pending.retain(|op| !ids.contains(&op.id));
        state.deletions.push(ids.to_vec());
        Ok(())
    }

    async fn get_operations_count(&self) -> SyncResult<usize> {
        let state = self.inner.lock();
        Self::check_available(&state)?;
        Ok(state.pending.len())
    }
}
