use async_trait::async_trait;
use tracing::debug;

use super::Strategy;
use crate::{FailureReason, RecoveryContext};

/// Reconnect right away. Consumes one attempt and always succeeds; whether
/// the new socket really works is the transport layer's business.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

#[async_trait]
impl Strategy for Immediate {
    async fn execute(&self, ctx: &mut RecoveryContext) -> Result<bool, FailureReason> {
        ctx.record_attempt();
        debug!(
            connection_id = %ctx.connection_id,
            attempt = ctx.attempt_count,
            "Immediate recovery attempt"
        );
        Ok(true)
    }
}
