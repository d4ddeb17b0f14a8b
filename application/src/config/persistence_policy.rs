//! Checkpoint persistence policy

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistencePolicy {
    /// Retries after a failed checkpoint write before the session is failed
    pub checkpoint_retries: u32,
    pub checkpoint_retry_delay: Duration,
    /// Checkpoints kept per session, not counting the final one
    pub retention: usize,
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self {
            checkpoint_retries: 3,
            checkpoint_retry_delay: Duration::from_millis(100),
            retention: 5,
        }
    }
}

impl PersistencePolicy {
    pub fn with_checkpoint_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.checkpoint_retries = retries;
        self.checkpoint_retry_delay = delay;
        self
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }
}
