//! Connection-resilience core for long-lived WebSocket sessions
//!
//! [`Tether`] wires the connection registry, the delivery coordinator and the
//! recovery orchestrator together around one set of telemetry counters. Hosts
//! register transports with [`Tether::connect`], push payloads with
//! [`Tether::send`] and report broken connections through
//! [`Tether::handle_failure`].

pub mod bridge;
pub mod config;
pub mod controller;

pub use config::{ConfigError, TetherConfig, find_config_file};
pub use controller::{HealthReport, SendOutcome, Tether};
pub use tether_common as common;
pub use tether_delivery as delivery;
pub use tether_recovery as recovery;
pub use tether_registry as registry;
