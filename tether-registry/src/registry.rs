//! Connection registry
//!
//! Two maps: user → entries and connection → user. The user map is the
//! authority; the reverse map only lets callers disconnect by connection id.
//! Per-user mutations happen under that user's `DashMap` shard lock, so a
//! concurrent connect can never be lost to a disconnect that empties the
//! user's list.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use tether_common::{ConnectionId, Payload, TelemetryCounters, UserId};
use tracing::{debug, info, warn};

use crate::{RegistryError, Transport, TransportError};

#[derive(Clone)]
pub struct ConnectionEntry {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub transport: Arc<dyn Transport>,
    pub connected_at: DateTime<Utc>,
}

impl fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("connection_id", &self.connection_id)
            .field("user_id", &self.user_id)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    users: DashMap<UserId, Vec<ConnectionEntry>>,
    owners: DashMap<ConnectionId, UserId>,
    counters: Arc<TelemetryCounters>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(counters: Arc<TelemetryCounters>) -> Self {
        Self {
            users: DashMap::new(),
            owners: DashMap::new(),
            counters,
        }
    }

    /// Register a new transport for `user_id`
    pub fn connect(&self, user_id: UserId, transport: Arc<dyn Transport>) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        let entry = ConnectionEntry {
            connection_id,
            user_id: user_id.clone(),
            transport,
            connected_at: Utc::now(),
        };

        let devices = {
            let mut entries = self.users.entry(user_id.clone()).or_default();
            entries.push(entry);
            entries.len()
        };
        self.owners.insert(connection_id, user_id.clone());
        self.counters.record_connection_opened();

        info!(%user_id, %connection_id, devices, "Connection registered");
        connection_id
    }

    /// Remove one connection. Other connections of the same user stay.
    ///
    /// Returns the removed entry, or `None` if the connection was already gone.
    pub fn disconnect(&self, connection_id: ConnectionId) -> Option<ConnectionEntry> {
        let (_, user_id) = self.owners.remove(&connection_id)?;

        let removed = self.users.get_mut(&user_id).and_then(|mut entries| {
            let index = entries
                .iter()
                .position(|entry| entry.connection_id == connection_id)?;
            Some(entries.remove(index))
        });

        // Only drop the key if nobody connected in the meantime
        self.users.remove_if(&user_id, |_, entries| entries.is_empty());

        if removed.is_some() {
            self.counters.record_connection_closed();
            info!(%user_id, %connection_id, "Connection unregistered");
        } else {
            debug!(%user_id, %connection_id, "Disconnect for unknown connection");
        }

        removed
    }

    /// Transports currently registered for `user_id`
    #[must_use]
    pub fn lookup(&self, user_id: &UserId) -> Vec<Arc<dyn Transport>> {
        self.users
            .get(user_id)
            .map(|entries| entries.iter().map(|e| e.transport.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn entries(&self, user_id: &UserId) -> Vec<ConnectionEntry> {
        self.users
            .get(user_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_connected(&self, user_id: &UserId) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|entries| !entries.is_empty())
    }

    #[must_use]
    pub fn user_for(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.owners
            .get(&connection_id)
            .map(|user| user.value().clone())
    }

    #[must_use]
    pub fn transport_for(&self, connection_id: ConnectionId) -> Option<Arc<dyn Transport>> {
        let user_id = self.user_for(connection_id)?;
        self.users.get(&user_id).and_then(|entries| {
            entries
                .iter()
                .find(|entry| entry.connection_id == connection_id)
                .map(|entry| entry.transport.clone())
        })
    }

    #[must_use]
    pub fn connected_users(&self) -> Vec<UserId> {
        self.users
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Total number of live connections across all users
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }

    /// Send `payload` on every transport of `user_id` concurrently.
    ///
    /// Returns how many transports accepted it.
    ///
    /// # Errors
    /// [`RegistryError::NotConnected`] if the user has no transport and
    /// [`RegistryError::AllTransportsFailed`] if every send failed.
    pub async fn send_to_user(
        &self,
        user_id: &UserId,
        payload: &Payload,
    ) -> Result<usize, RegistryError> {
        let transports = self.lookup(user_id);
        if transports.is_empty() {
            return Err(RegistryError::NotConnected(user_id.clone()));
        }

        let attempted = transports.len();
        let results = join_all(transports.iter().map(|t| t.send(payload))).await;

        let mut delivered = 0;
        let mut last = None;
        for result in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(%user_id, error = %e, "Transport send failed");
                    last = Some(e);
                }
            }
        }

        if delivered == 0 {
            return Err(RegistryError::AllTransportsFailed {
                user_id: user_id.clone(),
                attempted,
                last: last.unwrap_or(TransportError::Closed),
            });
        }

        Ok(delivered)
    }

    /// Send `payload` to every connected user. Returns how many users got it
    /// on at least one transport.
    pub async fn broadcast(&self, payload: &Payload) -> usize {
        let users = self.connected_users();
        let results = join_all(users.iter().map(|user| self.send_to_user(user, payload))).await;

        results.into_iter().filter(Result::is_ok).count()
    }

    /// Close and forget every connection
    pub async fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.owners.iter().map(|entry| *entry.key()).collect();
        let entries: Vec<ConnectionEntry> = ids
            .into_iter()
            .filter_map(|id| self.disconnect(id))
            .collect();

        join_all(entries.iter().map(|entry| entry.transport.close())).await;

        entries.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ChannelTransport;

    #[derive(Debug, Default)]
    struct BrokenTransport {
        closed: AtomicBool,
    }

    #[async_trait]
    impl Transport for BrokenTransport {
        async fn send(&self, _payload: &Payload) -> Result<(), TransportError> {
            Err(TransportError::Send("broken pipe".to_string()))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(TelemetryCounters::new()))
    }

    fn payload() -> Payload {
        Arc::new(serde_json::json!({"type": "ping"}))
    }

    #[test]
    fn test_connect_and_disconnect() {
        let registry = registry();
        let user = UserId::from("u1");
        let (transport, _rx) = ChannelTransport::new(1);

        let id = registry.connect(user.clone(), Arc::new(transport));
        assert!(registry.is_connected(&user));
        assert_eq!(registry.user_for(id), Some(user.clone()));
        assert_eq!(registry.connection_count(), 1);

        assert!(registry.disconnect(id).is_some());
        assert!(!registry.is_connected(&user));
        assert!(registry.connected_users().is_empty());
        assert!(registry.disconnect(id).is_none());

        let snapshot = registry.counters.snapshot();
        assert_eq!(snapshot.connections_opened, 1);
        assert_eq!(snapshot.connections_closed, 1);
    }

    #[test]
    fn test_stale_disconnect_keeps_newer_connection() {
        let registry = registry();
        let user = UserId::from("u1");
        let (old, _old_rx) = ChannelTransport::new(1);
        let (new, _new_rx) = ChannelTransport::new(1);

        let old_id = registry.connect(user.clone(), Arc::new(old));
        let new_id = registry.connect(user.clone(), Arc::new(new));

        registry.disconnect(old_id);

        assert!(registry.is_connected(&user));
        let entries = registry.entries(&user);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].connection_id, new_id);
        assert!(registry.transport_for(old_id).is_none());
        assert!(registry.transport_for(new_id).is_some());
    }

    #[tokio::test]
    async fn test_send_to_user_fans_out() {
        let registry = registry();
        let user = UserId::from("u1");
        let (phone, mut phone_rx) = ChannelTransport::new(1);
        let (laptop, mut laptop_rx) = ChannelTransport::new(1);
        registry.connect(user.clone(), Arc::new(phone));
        registry.connect(user.clone(), Arc::new(laptop));

        let delivered = registry.send_to_user(&user, &payload()).await.unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(phone_rx.recv().await.unwrap(), payload());
        assert_eq!(laptop_rx.recv().await.unwrap(), payload());
    }

    #[tokio::test]
    async fn test_send_to_user_partial_failure_still_succeeds() {
        let registry = registry();
        let user = UserId::from("u1");
        let (good, _rx) = ChannelTransport::new(1);
        registry.connect(user.clone(), Arc::new(good));
        registry.connect(user.clone(), Arc::new(BrokenTransport::default()));

        assert_eq!(registry.send_to_user(&user, &payload()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_send_to_user_errors() {
        let registry = registry();
        let user = UserId::from("u1");

        let err = registry.send_to_user(&user, &payload()).await.unwrap_err();
        assert!(err.is_not_connected());

        registry.connect(user.clone(), Arc::new(BrokenTransport::default()));
        let err = registry.send_to_user(&user, &payload()).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::AllTransportsFailed { attempted: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_broadcast_and_close_all() {
        let registry = registry();
        let (a, mut a_rx) = ChannelTransport::new(1);
        let broken = Arc::new(BrokenTransport::default());
        registry.connect(UserId::from("a"), Arc::new(a));
        registry.connect(UserId::from("b"), broken.clone());

        assert_eq!(registry.broadcast(&payload()).await, 1);
        assert_eq!(a_rx.recv().await.unwrap(), payload());

        assert_eq!(registry.close_all().await, 2);
        assert!(broken.closed.load(Ordering::SeqCst));
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_connect_disconnect() {
        let registry = Arc::new(registry());
        let user = UserId::from("u1");

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                let user = user.clone();
                tokio::spawn(async move {
                    let (transport, _rx) = ChannelTransport::new(1);
                    let id = registry.connect(user, Arc::new(transport));
                    tokio::task::yield_now().await;
                    registry.disconnect(id)
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }

        assert!(!registry.is_connected(&user));
        assert_eq!(registry.connection_count(), 0);
    }
}
