use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::Strategy;
use crate::{FailureReason, RecoveryContext};

/// Wait out the context's backoff delay, then double it.
///
/// The wait is measured from the previous attempt, so time already spent in
/// other strategies counts towards it. With no previous attempt the full
/// delay is slept.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    max_delay: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub const fn new(max_delay: Duration) -> Self {
        Self { max_delay }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl Strategy for ExponentialBackoff {
    async fn execute(&self, ctx: &mut RecoveryContext) -> Result<bool, FailureReason> {
        let elapsed = ctx
            .last_attempt_time
            .map_or(Duration::ZERO, |last| last.elapsed());
        let wait = ctx.backoff_delay.saturating_sub(elapsed);

        if !wait.is_zero() {
            debug!(
                connection_id = %ctx.connection_id,
                wait_ms = wait.as_millis(),
                "Backing off before reconnect"
            );
            tokio::time::sleep(wait).await;
        }

        ctx.backoff_delay = ctx.backoff_delay.saturating_mul(2).min(self.max_delay);
        ctx.record_attempt();

        if ctx.attempt_count <= ctx.max_attempts {
            Ok(true)
        } else {
            Err(FailureReason::AttemptsExhausted {
                attempts: ctx.attempt_count,
                max_attempts: ctx.max_attempts,
            })
        }
    }
}
