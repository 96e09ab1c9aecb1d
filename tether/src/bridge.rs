//! Glue between the delivery coordinator and the connection registry

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tether_common::{Payload, UserId, delivery};
use tether_delivery::{DeliveryError, SendCallback};
use tether_registry::{ConnectionRegistry, RegistryError};

/// Translate a registry failure into the delivery taxonomy
pub fn delivery_error(error: RegistryError) -> DeliveryError {
    match error {
        RegistryError::NotConnected(user_id) => DeliveryError::NotConnected(user_id),
        error @ RegistryError::AllTransportsFailed { .. } => {
            DeliveryError::Transport(error.to_string())
        }
    }
}

/// Sends retried payloads through the registry.
///
/// Never touches the ledger, so the `retry` flag only shows up in logs.
#[derive(Debug, Clone)]
pub struct RegistryCallback {
    registry: Arc<ConnectionRegistry>,
    timeout: Duration,
}

impl RegistryCallback {
    #[must_use]
    pub const fn new(registry: Arc<ConnectionRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }
}

#[async_trait]
impl SendCallback for RegistryCallback {
    async fn send(
        &self,
        user_id: &UserId,
        payload: &Payload,
        retry: bool,
    ) -> Result<bool, DeliveryError> {
        let delivered =
            tokio::time::timeout(self.timeout, self.registry.send_to_user(user_id, payload))
                .await
                .map_err(|_| DeliveryError::Timeout(self.timeout))?
                .map_err(delivery_error)?;

        delivery!(
            level = DEBUG,
            "Delivered to {user_id} on {delivered} transport(s) (retry={retry})"
        );

        Ok(delivered > 0)
    }
}
