//! Network collaborator abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use plotsync_protocol::{BatchResult, Operation};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Exchanges operation batches with the sync server.
///
/// Implementations classify failures into [`SyncError`] variants:
/// rejected credentials become [`SyncError::AuthenticationFailed`], an
/// explicit stale-version answer becomes [`SyncError::VersionConflict`],
/// everything else a [`SyncError::Transport`] with the right `retryable`
/// flag.
#[async_trait]
pub trait SyncNetwork: Send + Sync {
    /// Sends one batch of local operations.
    ///
    /// `known_version` is the sync version the device last observed.
    async fn send_operations(
        &self,
        project_id: &str,
        device_id: &str,
        known_version: u64,
        operations: &[Operation],
    ) -> SyncResult<BatchResult>;

    /// Fetches operations the server accepted after `since_version`.
    async fn get_operations(&self, project_id: &str, since_version: u64)
        -> SyncResult<BatchResult>;

    /// Reports connectivity. Offline cycles are silent no-ops.
    fn is_online(&self) -> bool;
}

/// A scripted network for testing.
///
/// Responses are consumed in order; once a script is empty the repeatable
/// fallback set with `set_push_response`/`set_catch_up_response` is used.
#[derive(Debug)]
pub struct MockNetwork {
    online: AtomicBool,
    push_script: Mutex<VecDeque<SyncResult<BatchResult>>>,
    push_fallback: Mutex<Option<SyncResult<BatchResult>>>,
    catch_up_script: Mutex<VecDeque<SyncResult<BatchResult>>>,
    catch_up_fallback: Mutex<Option<SyncResult<BatchResult>>>,
    sent: Mutex<Vec<Vec<i64>>>,
    catch_up_calls: Mutex<Vec<u64>>,
}

impl MockNetwork {
    /// Creates an online mock with no responses.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            push_script: Mutex::new(VecDeque::new()),
            push_fallback: Mutex::new(None),
            catch_up_script: Mutex::new(VecDeque::new()),
            catch_up_fallback: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            catch_up_calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a one-shot push response.
    pub fn push_response(&self, response: SyncResult<BatchResult>) {
        self.push_script.lock().push_back(response);
    }

    /// Sets the repeatable push response.
    pub fn set_push_response(&self, response: SyncResult<BatchResult>) {
        *self.push_fallback.lock() = Some(response);
    }

    /// Queues a one-shot catch-up response.
    pub fn catch_up_response(&self, response: SyncResult<BatchResult>) {
        self.catch_up_script.lock().push_back(response);
    }

    /// Sets the repeatable catch-up response.
    pub fn set_catch_up_response(&self, response: SyncResult<BatchResult>) {
        *self.catch_up_fallback.lock() = Some(response);
    }

    /// Sets the connectivity flag.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Ids of every batch sent so far, in call order.
    pub fn sent_batches(&self) -> Vec<Vec<i64>> {
        self.sent.lock().clone()
    }

    /// Number of `send_operations` calls.
    pub fn send_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// `since_version` of every catch-up call, in call order.
    pub fn catch_up_calls(&self) -> Vec<u64> {
        self.catch_up_calls.lock().clone()
    }

    fn next(
        script: &Mutex<VecDeque<SyncResult<BatchResult>>>,
        fallback: &Mutex<Option<SyncResult<BatchResult>>>,
        what: &str,
    ) -> SyncResult<BatchResult> {
        if let Some(response) = script.lock().pop_front() {
            return response;
        }
        fallback
            .lock()
            .clone()
            .unwrap_or_else(|| Err(SyncError::Protocol(format!("no mock {what} response set"))))
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncNetwork for MockNetwork {
    async fn send_operations(
        &self,
        _project_id: &str,
        _device_id: &str,
        _known_version: u64,
        operations: &[Operation],
    ) -> SyncResult<BatchResult> {
        self.sent
            .lock()
            .push(operations.iter().map(|op| op.id).collect());
        Self::next(&self.push_script, &self.push_fallback, "push")
    }

    async fn get_operations(
        &self,
        _project_id: &str,
        since_version: u64,
    ) -> SyncResult<BatchResult> {
        self.catch_up_calls.lock().push(since_version);
        Self::next(&self.catch_up_script, &self.catch_up_fallback, "catch-up")
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
