use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tether_common::{
    ConnectionFailure, ConnectionId, JanitorHandle, MessageId, Payload, PeriodicJanitor, Signal,
    StateSnapshot, TelemetryCounters, TelemetrySnapshot, UserId, delivery, internal,
};
use tether_delivery::{DeliveryError, MessageDeliveryCoordinator, RetryReport, TransactionalStats};
use tether_recovery::{
    AcknowledgeRestorer, RecoveryOrchestrator, RecoveryStatus, SnapshotRestorer, StrategyKind,
};
use tether_registry::{ConnectionRegistry, Transport};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    bridge::{RegistryCallback, delivery_error},
    config::TetherConfig,
};

/// Result of [`Tether::send`]
#[derive(Debug)]
pub enum SendOutcome {
    /// At least one transport accepted the payload
    Delivered {
        message_id: MessageId,
        transports: usize,
    },
    /// The send failed; the message waits in the pending map for a retry sweep
    Queued {
        message_id: MessageId,
        reason: DeliveryError,
    },
}

impl SendOutcome {
    #[must_use]
    pub const fn message_id(&self) -> &MessageId {
        match self {
            Self::Delivered { message_id, .. } | Self::Queued { message_id, .. } => message_id,
        }
    }

    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Point-in-time view for health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub telemetry: TelemetrySnapshot,
    pub delivery: TransactionalStats,
    pub connected_users: usize,
    pub active_recoveries: usize,
}

/// The composition root. Owns one of each component and the shared counters.
pub struct Tether {
    config: TetherConfig,
    counters: Arc<TelemetryCounters>,
    registry: Arc<ConnectionRegistry>,
    delivery: Arc<MessageDeliveryCoordinator>,
    recovery: Arc<RecoveryOrchestrator>,
    shutdown: broadcast::Sender<Signal>,
    janitor: Mutex<Option<JanitorHandle>>,
}

impl std::fmt::Debug for Tether {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tether")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("delivery", &self.delivery)
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl Tether {
    #[must_use]
    pub fn new(config: TetherConfig) -> Self {
        Self::with_restorer(config, Arc::new(AcknowledgeRestorer))
    }

    /// Like [`Self::new`], with the host's way of re-applying state snapshots
    #[must_use]
    pub fn with_restorer(config: TetherConfig, restorer: Arc<dyn SnapshotRestorer>) -> Self {
        let counters = Arc::new(TelemetryCounters::new());
        let registry = Arc::new(ConnectionRegistry::new(counters.clone()));
        let delivery = Arc::new(MessageDeliveryCoordinator::new(
            config.delivery.clone(),
            counters.clone(),
        ));
        let recovery = Arc::new(
            RecoveryOrchestrator::new(config.recovery.clone(), counters.clone())
                .with_restorer(restorer),
        );
        let (shutdown, _receiver) = broadcast::channel(64);

        Self {
            config,
            counters,
            registry,
            delivery,
            recovery,
            shutdown,
            janitor: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TetherConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn delivery(&self) -> &Arc<MessageDeliveryCoordinator> {
        &self.delivery
    }

    #[must_use]
    pub const fn recovery(&self) -> &Arc<RecoveryOrchestrator> {
        &self.recovery
    }

    #[must_use]
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<Signal> {
        self.shutdown.subscribe()
    }

    /// Start the periodic janitor over the delivery ledger and recovery
    /// contexts. Does nothing if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_janitor(&self) {
        let mut slot = self.janitor.lock();
        if slot.is_some() {
            return;
        }

        let janitor = PeriodicJanitor::new(self.config.janitor.clone())
            .with_target(self.delivery.clone())
            .with_target(self.recovery.clone());
        *slot = Some(janitor.spawn(self.shutdown.subscribe()));
    }

    pub fn connect(&self, user_id: UserId, transport: Arc<dyn Transport>) -> ConnectionId {
        self.registry.connect(user_id, transport)
    }

    /// Returns `false` if the connection was already gone. The connection's
    /// health score goes with it; a saved state snapshot stays.
    pub fn disconnect(&self, connection_id: ConnectionId) -> bool {
        self.recovery.release_connection(connection_id);
        self.registry.disconnect(connection_id).is_some()
    }

    /// Send `payload` to every connection of `user_id`, tracking it in the
    /// ledger until a transport accepts it.
    pub async fn send(&self, user_id: UserId, payload: Payload) -> SendOutcome {
        let message_id = MessageId::generate();
        let timeout = self.config.delivery.send_timeout();

        self.delivery
            .mark_sending(message_id.clone(), user_id.clone(), payload.clone());

        let result =
            tokio::time::timeout(timeout, self.registry.send_to_user(&user_id, &payload))
                .await
                .map_err(|_| DeliveryError::Timeout(timeout))
                .and_then(|sent| sent.map_err(delivery_error));

        match result {
            Ok(transports) => {
                self.delivery.mark_sent(&message_id);
                delivery!(
                    level = DEBUG,
                    "Message {message_id} sent to {user_id} on {transports} transport(s)"
                );
                SendOutcome::Delivered {
                    message_id,
                    transports,
                }
            }
            Err(reason) => {
                self.delivery
                    .mark_pending(message_id.clone(), user_id, payload);
                SendOutcome::Queued { message_id, reason }
            }
        }
    }

    /// Count a message received from a client
    pub fn record_inbound(&self, user_id: &UserId) {
        self.counters.record_message_received();
        tracing::trace!(%user_id, "Inbound message");
    }

    /// Recover a failed connection and, if that worked, flush its pending
    /// messages.
    pub async fn handle_failure(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        error: ConnectionFailure,
        strategies: Option<Vec<StrategyKind>>,
    ) -> bool {
        let recovered = self
            .recovery
            .initiate_recovery(connection_id, user_id, error, strategies)
            .await;

        if recovered {
            self.retry_pending_messages().await;
        }

        recovered
    }

    /// Run one retry sweep over the pending map through the registry
    pub async fn retry_pending_messages(&self) -> RetryReport {
        let callback =
            RegistryCallback::new(self.registry.clone(), self.config.delivery.send_timeout());
        self.delivery.retry_pending(&callback).await
    }

    pub fn save_state_snapshot(&self, connection_id: ConnectionId, snapshot: StateSnapshot) {
        self.recovery.save_state_snapshot(connection_id, snapshot);
    }

    pub fn clear_state_snapshot(&self, connection_id: ConnectionId) -> Option<StateSnapshot> {
        self.recovery.clear_state_snapshot(connection_id)
    }

    #[must_use]
    pub fn recovery_status(&self, connection_id: ConnectionId) -> Option<RecoveryStatus> {
        self.recovery.get_recovery_status(connection_id)
    }

    #[must_use]
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.counters.snapshot()
    }

    #[must_use]
    pub fn transactional_stats(&self) -> TransactionalStats {
        self.delivery.get_transactional_stats()
    }

    #[must_use]
    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            telemetry: self.telemetry(),
            delivery: self.transactional_stats(),
            connected_users: self.registry.connected_users().len(),
            active_recoveries: self.recovery.active_recoveries(),
        }
    }

    /// Run until ctrl-c or SIGTERM, then shut everything down
    ///
    /// # Errors
    ///
    /// If the signal handlers can't be installed
    pub async fn serve(&self) -> anyhow::Result<()> {
        self.start_janitor();
        internal!(level = INFO, "Tether running");

        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                internal!(level = INFO, "CTRL+C entered, shutting down");
            }
            _ = terminate.recv() => {
                internal!(level = INFO, "Terminate Signal received, shutting down");
            }
        };

        self.shutdown().await;
        Ok(())
    }

    /// Stop the janitor, then drop all in-flight state and connections.
    ///
    /// Unconfirmed messages are lost. Safe to call more than once.
    pub async fn shutdown(&self) {
        internal!(level = INFO, "Shutting down...");

        if self.shutdown.send(Signal::Shutdown).is_err() {
            tracing::debug!("No shutdown listeners");
        }

        let janitor = self.janitor.lock().take();
        if let Some(janitor) = janitor {
            janitor.stop().await;
        }

        let discarded = self.delivery.clear();
        let closed = self.registry.close_all().await;

        let final_counts = self.counters.snapshot();
        info!(
            discarded,
            closed,
            messages_sent = final_counts.messages_sent,
            messages_dropped = final_counts.messages_dropped,
            recoveries_succeeded = final_counts.recoveries_succeeded,
            recoveries_exhausted = final_counts.recoveries_exhausted,
            "Tether stopped"
        );

        self.counters.reset();
        let _ = self.shutdown.send(Signal::Finalised);
    }
}
