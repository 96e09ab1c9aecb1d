//! Typed errors reported by send callbacks.
//!
//! None of these escape the coordinator: a failed send only moves the message
//! to `pending`, and a failed retry only leaves it there.

use std::time::Duration;

use tether_common::UserId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The user has no live transport to send on.
    #[error("User {0} has no live connection")]
    NotConnected(UserId),

    /// The transport accepted the call but failed to write the payload.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The send did not complete in time.
    #[error("Send timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The payload could not be encoded for the wire.
    #[error("Payload encoding failed: {0}")]
    Encoding(String),
}

impl DeliveryError {
    /// Returns `true` if a later retry has a chance of succeeding.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        !matches!(self, Self::Encoding(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DeliveryError::NotConnected(UserId::from("u1"));
        assert_eq!(error.to_string(), "User u1 has no live connection");

        let error = DeliveryError::Timeout(Duration::from_millis(1500));
        assert_eq!(error.to_string(), "Send timed out after 1500ms");
    }

    #[test]
    fn test_encoding_errors_are_not_temporary() {
        assert!(DeliveryError::Transport("reset".to_string()).is_temporary());
        assert!(!DeliveryError::Encoding("bad utf-8".to_string()).is_temporary());
    }
}
