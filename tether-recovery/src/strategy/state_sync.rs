use std::sync::Arc;

use async_trait::async_trait;
use tether_common::{ConnectionId, StateSnapshot, UserId};
use tracing::{debug, info, warn};

use super::Strategy;
use crate::{FailureReason, RecoveryContext, RestoreError};

/// Re-applies a saved state snapshot to a recovered connection.
///
/// The snapshot is opaque to this crate; only the host knows what it means.
#[async_trait]
pub trait SnapshotRestorer: Send + Sync {
    /// # Errors
    /// If the snapshot could not be applied
    async fn restore(
        &self,
        connection_id: ConnectionId,
        user_id: &UserId,
        snapshot: &StateSnapshot,
    ) -> Result<(), RestoreError>;
}

/// Restorer that only acknowledges the snapshot is there
#[derive(Debug, Default, Clone, Copy)]
pub struct AcknowledgeRestorer;

#[async_trait]
impl SnapshotRestorer for AcknowledgeRestorer {
    async fn restore(
        &self,
        connection_id: ConnectionId,
        user_id: &UserId,
        _snapshot: &StateSnapshot,
    ) -> Result<(), RestoreError> {
        info!(%connection_id, %user_id, "State snapshot available for resync");
        Ok(())
    }
}

/// Resynchronise session state. Nothing to resync is not a failure.
#[derive(Clone)]
pub struct StateSync {
    restorer: Arc<dyn SnapshotRestorer>,
}

impl std::fmt::Debug for StateSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSync").finish_non_exhaustive()
    }
}

impl StateSync {
    #[must_use]
    pub fn new(restorer: Arc<dyn SnapshotRestorer>) -> Self {
        Self { restorer }
    }
}

impl Default for StateSync {
    fn default() -> Self {
        Self::new(Arc::new(AcknowledgeRestorer))
    }
}

#[async_trait]
impl Strategy for StateSync {
    async fn execute(&self, ctx: &mut RecoveryContext) -> Result<bool, FailureReason> {
        let Some(snapshot) = ctx.state_snapshot.clone() else {
            debug!(connection_id = %ctx.connection_id, "No state snapshot to resync");
            return Ok(true);
        };

        match self
            .restorer
            .restore(ctx.connection_id, &ctx.user_id, &snapshot)
            .await
        {
            Ok(()) => {
                ctx.metadata
                    .insert("state_restored".to_string(), serde_json::Value::Bool(true));
                Ok(true)
            }
            Err(e) => {
                warn!(
                    connection_id = %ctx.connection_id,
                    user_id = %ctx.user_id,
                    error = %e,
                    "State restore failed"
                );
                Err(e.into())
            }
        }
    }
}
