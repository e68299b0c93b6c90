//! Engine configuration.

use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Tunables for the lifecycle controller, reconciler, and event router.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded execution-context grant duration requested on start.
    pub grant_duration: Duration,
    /// How often the lifecycle worker wakes to check whether the grant
    /// needs renewal. The grant is renewed once half its duration has
    /// elapsed.
    pub renew_check_interval: Duration,
    /// Settle delay between tearing down and re-starting during an
    /// explicit restart, allowing the platform to release prior
    /// registrations.
    pub restart_settle_delay: Duration,
    /// Dedupe window time horizon; delivered tuples older than this are
    /// evicted.
    pub dedupe_horizon: Duration,
    /// Dedupe window entry bound; oldest entries are evicted beyond it.
    pub dedupe_capacity: usize,
    /// Extra attempts for a transiently failing registration within one
    /// reconciliation pass.
    pub transient_retries: u32,
    /// Backoff before the first transient retry; doubles per attempt.
    pub transient_backoff: Duration,
    /// Max queued lifecycle commands before callers see backpressure.
    pub control_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // 10 minutes, the platform wake-lock bound.
            grant_duration: Duration::from_secs(600),
            renew_check_interval: Duration::from_secs(30),
            restart_settle_delay: Duration::from_secs(2),
            dedupe_horizon: Duration::from_secs(60),
            dedupe_capacity: 256,
            transient_retries: 2,
            transient_backoff: Duration::from_millis(100),
            control_queue_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration, returning it unchanged on success.
    ///
    /// # Errors
    /// Returns an internal error for degenerate values that would stall
    /// the worker (zero grant, zero dedupe capacity, zero queue).
    pub fn validate(self) -> EngineResult<Self> {
        if self.grant_duration.is_zero() {
            return Err(EngineError::internal("grant_duration must be non-zero"));
        }
        if self.dedupe_capacity == 0 {
            return Err(EngineError::internal("dedupe_capacity must be at least 1"));
        }
        if self.control_queue_capacity == 0 {
            return Err(EngineError::internal(
                "control_queue_capacity must be at least 1",
            ));
        }
        Ok(self)
    }
}
