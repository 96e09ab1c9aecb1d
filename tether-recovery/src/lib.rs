//! Connection recovery
//!
//! When a transport reports a broken connection the host hands the failure to
//! the [`RecoveryOrchestrator`], which runs a list of [`Strategy`]s in order
//! until one of them brings the connection back. Each connection carries a
//! health score that decays with every failure; the circuit breaker strategy
//! refuses to recover connections whose score has fallen too far.

mod config;
mod context;
mod error;
mod health;
mod orchestrator;
pub mod strategy;

pub use config::RecoveryConfig;
pub use context::{RecoveryContext, RecoveryPhase, RecoveryStatus};
pub use error::{FailureReason, RestoreError};
pub use health::{FULL_HEALTH, HealthTable};
pub use orchestrator::RecoveryOrchestrator;
pub use strategy::{
    AcknowledgeRestorer, CircuitBreaker, ExponentialBackoff, Immediate, SnapshotRestorer,
    StateSync, Strategy, StrategyKind,
};
