//! Lifecycle status, counters and cycle outcomes.

use std::fmt;

/// Lifecycle status of the sync engine.
///
/// ```text
/// stopped --start--> running --pause--> paused --resume--> running
/// running/paused/error --stop--> stopped
/// running --retries exhausted--> error --start--> running
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// No timer; cycles are refused.
    Stopped,
    /// Timer armed; cycles run.
    Running,
    /// Timer armed; cycles are successful no-ops.
    Paused,
    /// Retries exhausted; cycles are refused until restarted.
    Error,
}

impl SyncStatus {
    /// Returns true if `start()` is allowed from this status.
    pub fn can_start(&self) -> bool {
        matches!(self, SyncStatus::Stopped | SyncStatus::Error)
    }

    /// Returns true if the timer exists in this status.
    pub fn has_timer(&self) -> bool {
        matches!(self, SyncStatus::Running | SyncStatus::Paused)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Stopped => write!(f, "stopped"),
            SyncStatus::Running => write!(f, "running"),
            SyncStatus::Paused => write!(f, "paused"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

/// Statistics about sync operations.
///
/// Counters only grow; `current_retry_count` resets on a successful cycle.
/// Times are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Operations acknowledged by the server and removed locally.
    pub total_operations_processed: u64,
    /// Acknowledged batches.
    pub successful_syncs: u64,
    /// Failed cycles.
    pub failed_syncs: u64,
    /// Time of the last acknowledged batch.
    pub last_sync_time: Option<u64>,
    /// Time of the last failure.
    pub last_error_time: Option<u64>,
    /// Message of the last failure.
    pub last_error: Option<String>,
    /// Consecutive failed cycles.
    pub current_retry_count: u32,
    /// Pending operations in the local queue at the end of the last cycle.
    pub pending_operations: usize,
    /// Catch-up fetches applied.
    pub catch_ups: u64,
    /// Local sync version.
    pub sync_version: u64,
}

/// Why a trigger did not run the cycle body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The engine is stopped.
    Stopped,
    /// The engine gave up after exhausting retries.
    Errored,
    /// The engine is paused.
    Paused,
    /// The network reports offline.
    Offline,
    /// Another cycle is in flight.
    Busy,
    /// The retry spacing since the last failure has not elapsed.
    Backoff,
}

/// What happened during one cycle that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Batches acknowledged.
    pub batches: usize,
    /// Operations acknowledged.
    pub processed: usize,
    /// Version reached by catch-up, if a conflict was handled.
    pub caught_up_to: Option<u64>,
    /// Failure recorded by this cycle, if any.
    pub failure: Option<String>,
    /// Operations still pending when the cycle ended.
    pub pending: usize,
    /// The engine was stopped while the cycle awaited; late results were dropped.
    pub discarded: bool,
}

/// Result of [`crate::SyncEngine::trigger_sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle body did not run.
    Skipped(SkipReason),
    /// The cycle body ran.
    Completed(CycleReport),
}

impl CycleOutcome {
    /// True when the engine accepted the trigger.
    ///
    /// Recorded failures, catch-ups and an authentication failure that
    /// stopped the engine still count; only a trigger refused because the
    /// engine is stopped or errored does not.
    pub fn ran_without_fatal_error(&self) -> bool {
        !matches!(
            self,
            CycleOutcome::Skipped(SkipReason::Stopped | SkipReason::Errored)
        )
    }

    /// True when the cycle ran, recorded no failure and left nothing pending.
    pub fn data_fully_synced(&self) -> bool {
        match self {
            CycleOutcome::Completed(report) => {
                report.failure.is_none()
                    && report.caught_up_to.is_none()
                    && !report.discarded
                    && report.pending == 0
            }
            CycleOutcome::Skipped(_) => false,
        }
    }

    /// Returns the report of a cycle that ran.
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(report) => Some(report),
            CycleOutcome::Skipped(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_checks() {
        assert!(SyncStatus::Stopped.can_start());
        assert!(SyncStatus::Error.can_start());
        assert!(!SyncStatus::Running.can_start());
        assert!(!SyncStatus::Paused.can_start());

        assert!(SyncStatus::Running.has_timer());
        assert!(SyncStatus::Paused.has_timer());
        assert!(!SyncStatus::Error.has_timer());
    }

    #[test]
    fn status_display() {
        assert_eq!(SyncStatus::Paused.to_string(), "paused");
    }

    #[test]
    fn outcome_signals_are_distinct() {
        let failed = CycleOutcome::Completed(CycleReport {
            failure: Some("timeout".into()),
            ..CycleReport::default()
        });
        assert!(failed.ran_without_fatal_error());
        assert!(!failed.data_fully_synced());

        let clean = CycleOutcome::Completed(CycleReport::default());
        assert!(clean.data_fully_synced());

        assert!(CycleOutcome::Skipped(SkipReason::Paused).ran_without_fatal_error());
        assert!(CycleOutcome::Skipped(SkipReason::Busy).ran_without_fatal_error());
        assert!(!CycleOutcome::Skipped(SkipReason::Stopped).ran_without_fatal_error());
        assert!(!CycleOutcome::Skipped(SkipReason::Errored).ran_without_fatal_error());
    }
}
