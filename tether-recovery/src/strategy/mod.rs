//! Recovery strategies
//!
//! A strategy is one way of trying to bring a connection back. The
//! orchestrator runs the strategies a caller asks for in order and stops at
//! the first one reporting success.

mod backoff;
mod circuit_breaker;
mod immediate;
mod state_sync;

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use backoff::ExponentialBackoff;
pub use circuit_breaker::CircuitBreaker;
pub use immediate::Immediate;
pub use state_sync::{AcknowledgeRestorer, SnapshotRestorer, StateSync};

use crate::{FailureReason, RecoveryContext};

/// Name under which a strategy is registered with the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    Immediate,
    ExponentialBackoff,
    CircuitBreaker,
    StateSync,
    /// A strategy registered by the host under its own name
    Custom(String),
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("immediate"),
            Self::ExponentialBackoff => f.write_str("exponential_backoff"),
            Self::CircuitBreaker => f.write_str("circuit_breaker"),
            Self::StateSync => f.write_str("state_sync"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "immediate" => Self::Immediate,
            "exponential_backoff" => Self::ExponentialBackoff,
            "circuit_breaker" => Self::CircuitBreaker,
            "state_sync" => Self::StateSync,
            other => Self::Custom(other.to_string()),
        })
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    /// Try to recover the connection described by `ctx`.
    ///
    /// `Ok(true)` ends the run successfully. `Ok(false)` and `Err` both let
    /// the orchestrator move on to the next strategy; an `Err` carries the
    /// reason for the logs.
    async fn execute(&self, ctx: &mut RecoveryContext) -> Result<bool, FailureReason>;
}
