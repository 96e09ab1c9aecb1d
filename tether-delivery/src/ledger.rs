//! In-flight message ledger
//!
//! Two maps, `sending` and `pending`, keyed by message id. Every transition
//! keeps a message id in at most one of them. The ledger itself is not
//! synchronised; [`MessageDeliveryCoordinator`](crate::MessageDeliveryCoordinator)
//! owns it behind a single mutex.

use std::sync::Arc;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_common::{MessageId, Payload, TelemetryCounters, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// A send is in progress
    Sending,
    /// At least one send failed; waiting for a retry sweep
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InFlightMessage {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub payload: Payload,
    /// Time of the last transition into the current status
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    /// Failed sends over the lifetime of this message id
    pub retry_count: u32,
}

/// Counts and ages of both maps, for health checks only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransactionalStats {
    pub sending_count: usize,
    pub pending_count: usize,
    pub oldest_sending: Option<DateTime<Utc>>,
    pub oldest_pending: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct TelemetryLedger {
    counters: Arc<TelemetryCounters>,
    sending: AHashMap<MessageId, InFlightMessage>,
    pending: AHashMap<MessageId, InFlightMessage>,
}

impl TelemetryLedger {
    #[must_use]
    pub fn new(counters: Arc<TelemetryCounters>) -> Self {
        Self {
            counters,
            sending: AHashMap::new(),
            pending: AHashMap::new(),
        }
    }

    #[must_use]
    pub const fn counters(&self) -> &Arc<TelemetryCounters> {
        &self.counters
    }

    /// Start (or restart) a send. A pending entry for the same id is taken
    /// over, carrying its retry count.
    pub fn mark_sending(
        &mut self,
        message_id: MessageId,
        user_id: UserId,
        payload: Payload,
        now: DateTime<Utc>,
    ) {
        let retry_count = self
            .pending
            .remove(&message_id)
            .map_or(0, |stale| stale.retry_count);

        self.sending.insert(
            message_id.clone(),
            InFlightMessage {
                message_id,
                user_id,
                payload,
                timestamp: now,
                status: MessageStatus::Sending,
                retry_count,
            },
        );
    }

    /// Confirm delivery. Returns `false` for ids that were not tracked.
    pub fn mark_sent(&mut self, message_id: &MessageId) -> bool {
        let was_sending = self.sending.remove(message_id).is_some();
        let was_pending = self.pending.remove(message_id).is_some();

        if was_sending || was_pending {
            self.counters.record_message_sent();
        }

        was_sending || was_pending
    }

    /// Record a failed send, returning the message's new retry count.
    pub fn mark_pending(
        &mut self,
        message_id: MessageId,
        user_id: UserId,
        payload: Payload,
        now: DateTime<Utc>,
    ) -> u32 {
        let prior = self
            .sending
            .remove(&message_id)
            .or_else(|| self.pending.remove(&message_id))
            .map_or(0, |entry| entry.retry_count);
        let retry_count = prior.saturating_add(1);

        self.counters.record_error_handled();
        self.pending.insert(
            message_id.clone(),
            InFlightMessage {
                message_id,
                user_id,
                payload,
                timestamp: now,
                status: MessageStatus::Pending,
                retry_count,
            },
        );

        retry_count
    }

    /// Copy of the pending map, oldest first
    #[must_use]
    pub fn pending_snapshot(&self) -> Vec<InFlightMessage> {
        let mut entries: Vec<_> = self.pending.values().cloned().collect();
        entries.sort_by_key(|entry| entry.timestamp);
        entries
    }

    /// Remove a pending entry after a successful retry. A message that was
    /// moved back to `sending` in the meantime is left alone.
    pub fn confirm_retry(&mut self, message_id: &MessageId) -> bool {
        let confirmed = self.pending.remove(message_id).is_some();
        if confirmed {
            self.counters.record_message_sent();
        }
        confirmed
    }

    /// Remove a pending entry only if its retry count has reached `max_retries`.
    pub fn drop_exhausted(&mut self, message_id: &MessageId, max_retries: u32) -> bool {
        let exhausted = self
            .pending
            .get(message_id)
            .is_some_and(|entry| entry.retry_count >= max_retries);

        if exhausted {
            self.pending.remove(message_id);
            self.counters.record_message_dropped();
        }

        exhausted
    }

    /// Remove every entry, in either map, last touched strictly before `cutoff`.
    pub fn expire_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.len();
        self.sending.retain(|_, entry| entry.timestamp >= cutoff);
        self.pending.retain(|_, entry| entry.timestamp >= cutoff);
        let removed = before - self.len();

        if removed > 0 {
            self.counters.record_messages_expired(removed as u64);
        }

        removed
    }

    /// Forget everything. Returns how many messages were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.len();
        self.sending.clear();
        self.pending.clear();
        discarded
    }

    #[must_use]
    pub fn get(&self, message_id: &MessageId) -> Option<&InFlightMessage> {
        self.sending
            .get(message_id)
            .or_else(|| self.pending.get(message_id))
    }

    #[must_use]
    pub fn status(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.get(message_id).map(|entry| entry.status)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sending.len() + self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sending.is_empty() && self.pending.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> TransactionalStats {
        TransactionalStats {
            sending_count: self.sending.len(),
            pending_count: self.pending.len(),
            oldest_sending: self.sending.values().map(|entry| entry.timestamp).min(),
            oldest_pending: self.pending.values().map(|entry| entry.timestamp).min(),
        }
    }

    #[cfg(test)]
    pub(crate) fn in_both_maps(&self, message_id: &MessageId) -> bool {
        self.sending.contains_key(message_id) && self.pending.contains_key(message_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    use super::*;

    fn ledger() -> TelemetryLedger {
        TelemetryLedger::new(Arc::new(TelemetryCounters::new()))
    }

    fn payload() -> Payload {
        Arc::new(serde_json::json!({"type": "chat", "text": "hello"}))
    }

    #[test]
    fn test_mark_sending_then_sent() {
        let mut ledger = ledger();
        let id = MessageId::from("m1");

        ledger.mark_sending(id.clone(), UserId::from("u1"), payload(), Utc::now());
        assert_eq!(ledger.status(&id), Some(MessageStatus::Sending));

        assert!(ledger.mark_sent(&id));
        assert!(ledger.is_empty());
        assert_eq!(ledger.counters().snapshot().messages_sent, 1);
    }

    #[test]
    fn test_mark_sent_twice_or_unknown_is_noop() {
        let mut ledger = ledger();
        let id = MessageId::from("m1");

        assert!(!ledger.mark_sent(&MessageId::from("never-tracked")));

        ledger.mark_sending(id.clone(), UserId::from("u1"), payload(), Utc::now());
        assert!(ledger.mark_sent(&id));
        assert!(!ledger.mark_sent(&id));
        assert!(ledger.is_empty());
        assert_eq!(ledger.counters().snapshot().messages_sent, 1);
    }

    #[test]
    fn test_message_never_in_both_maps() {
        let mut ledger = ledger();
        let id = MessageId::from("m1");
        let user = UserId::from("u1");

        ledger.mark_sending(id.clone(), user.clone(), payload(), Utc::now());
        assert!(!ledger.in_both_maps(&id));

        ledger.mark_pending(id.clone(), user.clone(), payload(), Utc::now());
        assert!(!ledger.in_both_maps(&id));
        assert_eq!(ledger.status(&id), Some(MessageStatus::Pending));

        ledger.mark_sending(id.clone(), user.clone(), payload(), Utc::now());
        assert!(!ledger.in_both_maps(&id));
        assert_eq!(ledger.status(&id), Some(MessageStatus::Sending));

        // Pending without a prior sending entry replaces the pending one
        ledger.mark_pending(id.clone(), user.clone(), payload(), Utc::now());
        ledger.mark_pending(id.clone(), user, payload(), Utc::now());
        assert!(!ledger.in_both_maps(&id));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_retry_count_accumulates_across_cycles() {
        let mut ledger = ledger();
        let id = MessageId::from("m2");
        let user = UserId::from("u1");

        for expected in 1..=3 {
            ledger.mark_sending(id.clone(), user.clone(), payload(), Utc::now());
            let count = ledger.mark_pending(id.clone(), user.clone(), payload(), Utc::now());
            assert_eq!(count, expected);
        }

        assert_eq!(ledger.get(&id).map(|entry| entry.retry_count), Some(3));
        assert_eq!(ledger.counters().snapshot().errors_handled, 3);
    }

    #[test]
    fn test_drop_exhausted_only_at_bound() {
        let mut ledger = ledger();
        let id = MessageId::from("m1");
        let user = UserId::from("u1");

        ledger.mark_pending(id.clone(), user.clone(), payload(), Utc::now());
        ledger.mark_pending(id.clone(), user.clone(), payload(), Utc::now());
        assert!(!ledger.drop_exhausted(&id, 3));

        ledger.mark_pending(id.clone(), user, payload(), Utc::now());
        assert!(ledger.drop_exhausted(&id, 3));
        assert!(ledger.is_empty());
        assert_eq!(ledger.counters().snapshot().messages_dropped, 1);
    }

    #[test]
    fn test_expire_before_removes_both_statuses() {
        let mut ledger = ledger();
        let now = Utc::now();
        let old = now - Duration::seconds(1801);
        let user = UserId::from("u1");

        ledger.mark_sending(MessageId::from("old-sending"), user.clone(), payload(), old);
        ledger.mark_pending(MessageId::from("old-pending"), user.clone(), payload(), old);
        ledger.mark_sending(MessageId::from("fresh"), user, payload(), now);

        let removed = ledger.expire_before(now - Duration::seconds(1800));
        assert_eq!(removed, 2);
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.status(&MessageId::from("fresh")),
            Some(MessageStatus::Sending)
        );
        assert_eq!(ledger.counters().snapshot().messages_expired, 2);
    }

    #[test]
    fn test_expire_before_keeps_entry_exactly_at_cutoff() {
        let mut ledger = ledger();
        let cutoff = Utc::now() - Duration::seconds(1800);
        let user = UserId::from("u1");

        ledger.mark_pending(MessageId::from("boundary"), user.clone(), payload(), cutoff);
        ledger.mark_pending(
            MessageId::from("older"),
            user,
            payload(),
            cutoff - Duration::milliseconds(1),
        );

        assert_eq!(ledger.expire_before(cutoff), 1);
        assert_eq!(
            ledger.status(&MessageId::from("boundary")),
            Some(MessageStatus::Pending)
        );
        assert_eq!(ledger.status(&MessageId::from("older")), None);
    }

    #[test]
    fn test_stats_report_oldest_timestamps() {
        let mut ledger = ledger();
        let now = Utc::now();
        let earlier = now - Duration::seconds(30);
        let user = UserId::from("u1");

        ledger.mark_sending(MessageId::from("a"), user.clone(), payload(), now);
        ledger.mark_sending(MessageId::from("b"), user.clone(), payload(), earlier);
        ledger.mark_pending(MessageId::from("c"), user, payload(), now);

        assert_eq!(
            ledger.stats(),
            TransactionalStats {
                sending_count: 2,
                pending_count: 1,
                oldest_sending: Some(earlier),
                oldest_pending: Some(now),
            }
        );
    }
}
