use std::fmt::Debug;

use async_trait::async_trait;
use tether_common::Payload;
use tokio::sync::mpsc;

use crate::TransportError;

/// One live connection to a client, typically a WebSocket.
///
/// Implementations live in the host's transport layer; the registry only
/// needs to push payloads and close.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Write one payload to the peer
    ///
    /// # Errors
    /// If the payload could not be written
    async fn send(&self, payload: &Payload) -> Result<(), TransportError>;

    /// Close the connection. The default does nothing.
    async fn close(&self) {}
}

/// Transport backed by a bounded channel.
///
/// Useful for hosts that run a writer task per socket (the writer drains the
/// receiver into the socket) and for tests.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<Payload>,
}

impl ChannelTransport {
    /// Create a transport and the receiving end its writer task reads from
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, payload: &Payload) -> Result<(), TransportError> {
        self.sender
            .send(payload.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }
}
