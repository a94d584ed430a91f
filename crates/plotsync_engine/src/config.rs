//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Configuration for sync operations.
///
/// Immutable once handed to the engine. [`SyncConfig::validate`] runs at
/// construction time; an invalid configuration never produces an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Period of the recurring sync timer.
    pub sync_interval: Duration,
    /// Minimum spacing between a failed cycle and the next attempt.
    pub retry_delay: Duration,
    /// Consecutive failures tolerated before the engine gives up.
    pub max_retries: u32,
    /// Maximum operations per network exchange.
    pub batch_size: usize,
    /// Growth factor of the retry spacing per consecutive failure.
    pub backoff_multiplier: f64,
    /// Upper bound on the retry spacing.
    pub max_retry_delay: Duration,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sync timer period.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the minimum retry spacing.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the retry spacing cap.
    #[must_use]
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync_interval.is_zero() {
            return Err(SyncError::InvalidConfig("sync_interval must be positive".into()));
        }
        if self.retry_delay.is_zero() {
            return Err(SyncError::InvalidConfig("retry_delay must be positive".into()));
        }
        if self.max_retries == 0 {
            return Err(SyncError::InvalidConfig("max_retries must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(SyncError::InvalidConfig(
                "max_retry_delay must not be shorter than retry_delay".into(),
            ));
        }
        Ok(())
    }

    /// Spacing required after `consecutive_failures` failed cycles.
    pub fn retry_spacing(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let exponent = consecutive_failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.retry_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_retry_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_retry_delay)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
            max_retries: 3,
            batch_size: 50,
            backoff_multiplier: 1.0,
            max_retry_delay: Duration::from_secs(300),
        }
    }
}
