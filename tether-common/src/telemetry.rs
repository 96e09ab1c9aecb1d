//! Process-wide telemetry counters
//!
//! One [`TelemetryCounters`] is created by the composition root and shared by
//! every component through an `Arc`. Counters are plain atomics; readers take a
//! [`TelemetrySnapshot`].

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug)]
pub struct TelemetryCounters {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    messages_expired: AtomicU64,
    errors_handled: AtomicU64,
    circuit_breaks: AtomicU64,
    recoveries_succeeded: AtomicU64,
    recoveries_exhausted: AtomicU64,
    started: Mutex<(DateTime<Utc>, Instant)>,
}

impl Default for TelemetryCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryCounters {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            messages_expired: AtomicU64::new(0),
            errors_handled: AtomicU64::new(0),
            circuit_breaks: AtomicU64::new(0),
            recoveries_succeeded: AtomicU64::new(0),
            recoveries_exhausted: AtomicU64::new(0),
            started: Mutex::new((Utc::now(), Instant::now())),
        }
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// A message was given up on after exhausting its retries
    pub fn record_message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// In-flight entries removed by the janitor
    pub fn record_messages_expired(&self, count: u64) {
        self.messages_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error_handled(&self) {
        self.errors_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_break(&self) {
        self.circuit_breaks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery(&self, succeeded: bool) {
        if succeeded {
            self.recoveries_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.recoveries_exhausted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Zero every counter and restart the uptime clock
    pub fn reset(&self) {
        for counter in [
            &self.connections_opened,
            &self.connections_closed,
            &self.messages_sent,
            &self.messages_received,
            &self.messages_dropped,
            &self.messages_expired,
            &self.errors_handled,
            &self.circuit_breaks,
            &self.recoveries_succeeded,
            &self.recoveries_exhausted,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.started.lock() = (Utc::now(), Instant::now());
    }

    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let (started_at, started) = *self.started.lock();
        let opened = self.connections_opened.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);

        TelemetrySnapshot {
            connections_opened: opened,
            connections_closed: closed,
            active_connections: opened.saturating_sub(closed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            messages_expired: self.messages_expired.load(Ordering::Relaxed),
            errors_handled: self.errors_handled.load(Ordering::Relaxed),
            circuit_breaks: self.circuit_breaks.load(Ordering::Relaxed),
            recoveries_succeeded: self.recoveries_succeeded.load(Ordering::Relaxed),
            recoveries_exhausted: self.recoveries_exhausted.load(Ordering::Relaxed),
            started_at,
            uptime_secs: started.elapsed().as_secs(),
        }
    }
}

/// Read-only view of the counters for dashboards and health checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub active_connections: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub messages_expired: u64,
    pub errors_handled: u64,
    pub circuit_breaks: u64,
    pub recoveries_succeeded: u64,
    pub recoveries_exhausted: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}
