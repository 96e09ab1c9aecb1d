//! Error types for the tether-recovery crate.

use thiserror::Error;

/// Why a single strategy did not restore the connection.
///
/// A strategy returning one of these is treated exactly like one returning
/// `Ok(false)`; the orchestrator logs the reason and moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    /// The circuit breaker refused to attempt recovery at all.
    #[error("Circuit open: health {health:.2} is below {threshold:.2}")]
    CircuitOpen { health: f64, threshold: f64 },

    /// Health fell to a level the connection is not expected to recover from.
    #[error("Connection unrecoverable: health {health:.2}")]
    Unrecoverable { health: f64 },

    /// The attempt budget of this recovery run is spent.
    #[error("Attempts exhausted ({attempts}/{max_attempts})")]
    AttemptsExhausted { attempts: u32, max_attempts: u32 },

    /// Re-applying the saved state snapshot failed.
    #[error("State restore failed: {0}")]
    RestoreFailed(String),

    /// A custom handler failed for its own reasons.
    #[error("{0}")]
    Handler(String),
}

impl FailureReason {
    /// Returns `true` if the circuit breaker decided against recovery.
    #[must_use]
    pub const fn is_circuit_break(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::Unrecoverable { .. })
    }
}

/// Failure reported by a [`SnapshotRestorer`](crate::SnapshotRestorer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RestoreError(pub String);

impl From<RestoreError> for FailureReason {
    fn from(value: RestoreError) -> Self {
        Self::RestoreFailed(value.0)
    }
}
