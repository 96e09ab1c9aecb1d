//! Shared building blocks for the tether connection core
//!
//! Everything here is a leaf: identifiers, failure classification, the
//! process-wide telemetry counters, logging setup and the periodic janitor
//! that keeps in-memory state bounded.

pub mod error;
pub mod ids;
pub mod janitor;
pub mod logging;
pub mod telemetry;

use std::sync::Arc;

pub use error::{ConnectionFailure, ErrorCategory, Severity};
pub use ids::{ConnectionId, MessageId, UserId};
pub use janitor::{JanitorConfig, JanitorHandle, PeriodicJanitor, Sweep};
pub use telemetry::{TelemetryCounters, TelemetrySnapshot};
pub use tracing;

/// Message body handed to transports. Shared so that the ledger, retry sweep
/// and fan-out sends never copy it.
pub type Payload = Arc<serde_json::Value>;

/// Externally produced session/agent state kept across a connection failure.
/// Never interpreted by this workspace.
pub type StateSnapshot = Arc<serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
