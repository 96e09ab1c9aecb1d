//! Transactional delivery bookkeeping for outbound messages
//!
//! This crate tracks every message between "send attempted" and "confirmed
//! delivered":
//! - Messages being sent right now (`sending`)
//! - Messages whose send failed and await a retry sweep (`pending`)
//! - Bounded retries, after which a message is dropped and logged
//! - Expiry of entries whose owner disappeared without a terminal transition

mod coordinator;
mod error;
mod ledger;
mod policy;

pub use coordinator::{DeliveryConfig, MessageDeliveryCoordinator, RetryReport, SendCallback};
pub use error::DeliveryError;
pub use ledger::{InFlightMessage, MessageStatus, TelemetryLedger, TransactionalStats};
pub use policy::RetryPolicy;
