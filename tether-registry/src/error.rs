//! Error types for the tether-registry crate.

use tether_common::UserId;
use thiserror::Error;

/// A single transport failed to carry a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer or the local end closed the connection.
    #[error("Transport closed")]
    Closed,

    /// Writing to the transport failed.
    #[error("Send failed: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The user has no registered connection.
    #[error("User {0} is not connected")]
    NotConnected(UserId),

    /// Every transport of the user rejected the payload.
    #[error("All {attempted} transports of user {user_id} failed: {last}")]
    AllTransportsFailed {
        user_id: UserId,
        attempted: usize,
        last: TransportError,
    },
}

impl RegistryError {
    /// Returns `true` if the user had no connection at all.
    #[must_use]
    pub const fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected(_))
    }
}
