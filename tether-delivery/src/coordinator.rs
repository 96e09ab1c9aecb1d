//! Delivery coordinator
//!
//! Serialises every ledger transition behind one mutex and runs the retry
//! sweep. The sweep copies the pending map under the lock and performs the
//! sends with the lock released, so slow transports never block new
//! `mark_sending` calls. The copy may be stale by the time a send happens;
//! every follow-up mutation re-checks the live map.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_common::{MessageId, Payload, Sweep, TelemetryCounters, UserId, internal};
use tracing::{debug, error, info, warn};

use crate::{
    error::DeliveryError,
    ledger::{MessageStatus, TelemetryLedger, TransactionalStats},
    policy::RetryPolicy,
};

const fn default_send_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Upper bound for a single transport send (in seconds)
    ///
    /// Default: 10 seconds
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// Transport-side send used by the retry sweep.
///
/// `retry` is always `false` when called from the sweep: the callee must
/// deliver the payload as-is and must not open a new ledger entry for it.
/// `Ok(true)` confirms delivery; `Ok(false)` and `Err` both leave the message
/// pending with its retry count untouched, so it is tried again on the next
/// sweep until the janitor expires it.
#[async_trait]
pub trait SendCallback: Send + Sync {
    async fn send(
        &self,
        user_id: &UserId,
        payload: &Payload,
        retry: bool,
    ) -> Result<bool, DeliveryError>;
}

/// Outcome of one retry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    /// Sends attempted
    pub retried: usize,
    /// Sends confirmed while the message was still pending
    pub delivered: usize,
    /// Sends that failed and stay pending
    pub failed: usize,
    /// Messages dropped for exceeding the retry bound
    pub dropped: usize,
}

#[derive(Debug)]
pub struct MessageDeliveryCoordinator {
    config: DeliveryConfig,
    ledger: Mutex<TelemetryLedger>,
}

impl MessageDeliveryCoordinator {
    #[must_use]
    pub fn new(config: DeliveryConfig, counters: Arc<TelemetryCounters>) -> Self {
        Self {
            config,
            ledger: Mutex::new(TelemetryLedger::new(counters)),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn mark_sending(&self, message_id: MessageId, user_id: UserId, payload: Payload) {
        debug!(%message_id, %user_id, "Message sending");
        self.ledger
            .lock()
            .mark_sending(message_id, user_id, payload, Utc::now());
    }

    pub fn mark_sent(&self, message_id: &MessageId) {
        if self.ledger.lock().mark_sent(message_id) {
            debug!(%message_id, "Message delivered");
        } else {
            debug!(%message_id, "Delivery confirmed for untracked message");
        }
    }

    pub fn mark_pending(&self, message_id: MessageId, user_id: UserId, payload: Payload) {
        let retry_count = {
            let mut ledger = self.ledger.lock();
            ledger.mark_pending(message_id.clone(), user_id.clone(), payload, Utc::now())
        };

        warn!(
            %message_id,
            %user_id,
            retry_count,
            remaining = self.config.retry.remaining_retries(retry_count),
            "Message send failed, queued for retry"
        );
    }

    /// Retry every pending message once.
    ///
    /// Messages at the retry bound are dropped and logged; nobody else is
    /// told. Failures inside the callback never propagate.
    pub async fn retry_pending(&self, callback: &dyn SendCallback) -> RetryReport {
        let snapshot = self.ledger.lock().pending_snapshot();
        let mut report = RetryReport::default();

        if snapshot.is_empty() {
            return report;
        }

        info!(count = snapshot.len(), "Retrying pending messages");

        for entry in snapshot {
            if !self.config.retry.should_retry(entry.retry_count) {
                if self
                    .ledger
                    .lock()
                    .drop_exhausted(&entry.message_id, self.config.retry.max_retries)
                {
                    error!(
                        message_id = %entry.message_id,
                        user_id = %entry.user_id,
                        retry_count = entry.retry_count,
                        last_failure = %entry.timestamp,
                        "Message permanently failed after {} retries, dropping",
                        entry.retry_count
                    );
                    report.dropped += 1;
                }
                continue;
            }

            report.retried += 1;
            let outcome = callback.send(&entry.user_id, &entry.payload, false).await;

            match outcome {
                Ok(true) => {
                    if self.ledger.lock().confirm_retry(&entry.message_id) {
                        info!(
                            message_id = %entry.message_id,
                            retry_count = entry.retry_count,
                            "Pending message delivered on retry"
                        );
                        report.delivered += 1;
                    } else {
                        debug!(
                            message_id = %entry.message_id,
                            "Retried message is no longer pending, leaving ledger as is"
                        );
                    }
                }
                Ok(false) => {
                    warn!(
                        message_id = %entry.message_id,
                        retry_count = entry.retry_count,
                        "Retry not accepted by transport, leaving pending"
                    );
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(
                        message_id = %entry.message_id,
                        retry_count = entry.retry_count,
                        error = %e,
                        "Retry failed, leaving pending"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            retried = report.retried,
            delivered = report.delivered,
            failed = report.failed,
            dropped = report.dropped,
            "Retry sweep complete"
        );

        report
    }

    #[must_use]
    pub fn get_transactional_stats(&self) -> TransactionalStats {
        self.ledger.lock().stats()
    }

    #[must_use]
    pub fn message_status(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.ledger.lock().status(message_id)
    }

    #[must_use]
    pub fn retry_count(&self, message_id: &MessageId) -> Option<u32> {
        self.ledger
            .lock()
            .get(message_id)
            .map(|entry| entry.retry_count)
    }

    /// Remove every entry whose last transition is older than `max_age`.
    pub fn sweep_expired(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.ledger.lock().expire_before(cutoff)
    }

    /// Discard all in-flight state. Anything unconfirmed is lost.
    pub fn clear(&self) -> usize {
        let discarded = self.ledger.lock().clear();
        if discarded > 0 {
            warn!(discarded, "Discarding unconfirmed messages at shutdown");
        } else {
            internal!("Delivery ledger cleared");
        }
        discarded
    }
}

impl Sweep for MessageDeliveryCoordinator {
    fn name(&self) -> &'static str {
        "delivery-ledger"
    }

    fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_expired(Utc::now(), max_age)
    }
}
