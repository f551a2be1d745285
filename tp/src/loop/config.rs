//! Execution loop configuration

use std::time::Duration;

use tracing::debug;

/// Default attempts per task
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts of one task
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How the execution loop retries tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Attempts per task, at least 1
    pub max_attempts: u32,

    /// Pause before each retry; cancellation cuts it short
    pub retry_delay: Duration,
}

impl LoopConfig {
    pub fn new(max_attempts: u32) -> Self {
        debug!(max_attempts, "LoopConfig::new: called");
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}
