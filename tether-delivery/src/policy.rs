//! Retry policy for pending messages.
//!
//! Kept apart from the coordinator so the bound can be reasoned about and
//! tested without any ledger state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// A pending message whose retry count has reached this value is dropped
    /// instead of being sent again.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a message that has failed `retry_count` times may be sent again.
    #[must_use]
    pub const fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Get the number of remaining retry attempts.
    ///
    /// Returns `0` once the bound has been reached.
    #[must_use]
    pub const fn remaining_retries(&self, retry_count: u32) -> u32 {
        self.max_retries.saturating_sub(retry_count)
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        3
    }
}
