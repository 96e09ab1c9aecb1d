//! Periodic sweep of stale in-memory state
//!
//! Entries whose owner vanished without a terminal transition (a crash
//! mid-send, a dropped recovery future) would otherwise live forever. The
//! janitor wakes on a fixed interval and asks every registered [`Sweep`]
//! target to drop anything older than `max_age`.

use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{Signal, internal};

const fn default_interval_secs() -> u64 {
    300
}

const fn default_max_age_secs() -> u64 {
    1800
}

const fn default_shutdown_grace_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JanitorConfig {
    /// Seconds between sweeps
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Entries older than this many seconds are removed
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// How long shutdown waits for an in-progress sweep before aborting it
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_age_secs: default_max_age_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl JanitorConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Something holding time-stamped state the janitor can expire
pub trait Sweep: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &'static str;

    /// Remove everything older than `max_age`, returning how many entries went
    fn sweep(&self, max_age: Duration) -> usize;
}

pub struct PeriodicJanitor {
    config: JanitorConfig,
    targets: Vec<Arc<dyn Sweep>>,
}

impl fmt::Debug for PeriodicJanitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicJanitor")
            .field("config", &self.config)
            .field(
                "targets",
                &self.targets.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PeriodicJanitor {
    #[must_use]
    pub const fn new(config: JanitorConfig) -> Self {
        Self {
            config,
            targets: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: Arc<dyn Sweep>) -> Self {
        self.targets.push(target);
        self
    }

    /// Run one sweep over every target, returning the total removed
    pub fn sweep_once(&self) -> usize {
        let max_age = self.config.max_age();

        self.targets
            .iter()
            .map(|target| {
                let removed = target.sweep(max_age);
                if removed > 0 {
                    tracing::info!(
                        target_name = target.name(),
                        removed,
                        max_age_secs = max_age.as_secs(),
                        "Janitor expired stale entries"
                    );
                }
                removed
            })
            .sum()
    }

    /// Sweep on every interval tick until a shutdown signal arrives.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(
            "Janitor starting: interval={}s, max_age={}s",
            self.config.interval_secs,
            self.config.max_age_secs
        );

        let mut timer = tokio::time::interval(self.config.interval());
        // The first tick completes immediately
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let removed = self.sweep_once();
                    tracing::debug!(removed, "Janitor sweep complete");
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Janitor received shutdown signal");
                        }
                        Err(e) => {
                            tracing::warn!("Janitor shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        internal!("Janitor stopped");
    }

    /// Move the janitor onto its own task.
    pub fn spawn(self, shutdown: broadcast::Receiver<Signal>) -> JanitorHandle {
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let handle = tokio::spawn(async move { self.serve(shutdown).await });

        JanitorHandle { handle, grace }
    }
}

/// Join handle of a spawned janitor
#[derive(Debug)]
pub struct JanitorHandle {
    handle: JoinHandle<()>,
    grace: Duration,
}

impl JanitorHandle {
    /// Wait for the janitor to exit after a shutdown signal was sent.
    ///
    /// If it has not stopped within the grace period the task is aborted.
    /// Cancellation is expected here and never reported as an error.
    pub async fn stop(mut self) {
        let outcome = match tokio::time::timeout(self.grace, &mut self.handle).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.grace.as_secs(),
                    "Janitor did not stop in time, aborting"
                );
                self.handle.abort();
                self.handle.await
            }
        };

        match outcome {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => internal!("Janitor task cancelled"),
            Err(e) => tracing::error!("Janitor task failed: {e}"),
        }
    }

    /// Cancel the janitor without waiting for a shutdown signal.
    pub async fn abort(self) {
        self.handle.abort();
        if let Err(e) = self.handle.await
            && !e.is_cancelled()
        {
            tracing::error!("Janitor task failed: {e}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingTarget {
        calls: AtomicUsize,
        last_max_age: parking_lot::Mutex<Option<Duration>>,
    }

    impl Sweep for CountingTarget {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn sweep(&self, max_age: Duration) -> usize {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_max_age.lock() = Some(max_age);
            2
        }
    }

    #[test]
    fn test_defaults() {
        let config = JanitorConfig::default();
        assert_eq!(config.interval(), Duration::from_secs(300));
        assert_eq!(config.max_age(), Duration::from_secs(1800));
    }

    #[test]
    fn test_sweep_once_visits_every_target() {
        let first = Arc::new(CountingTarget::default());
        let second = Arc::new(CountingTarget::default());
        let janitor = PeriodicJanitor::new(JanitorConfig::default())
            .with_target(first.clone())
            .with_target(second.clone());

        assert_eq!(janitor.sweep_once(), 4);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*first.last_max_age.lock(), Some(Duration::from_secs(1800)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_sweeps_on_interval_and_stops_on_signal() {
        let target = Arc::new(CountingTarget::default());
        let janitor = PeriodicJanitor::new(JanitorConfig::default()).with_target(target.clone());

        let (sender, receiver) = broadcast::channel(4);
        let handle = janitor.spawn(receiver);

        // No sweep before the first full interval
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 2);

        sender.send(Signal::Shutdown).unwrap();
        handle.stop().await;

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_swallows_cancellation() {
        let janitor = PeriodicJanitor::new(JanitorConfig::default());
        let (_sender, receiver) = broadcast::channel(4);
        let handle = janitor.spawn(receiver);

        handle.abort().await;
    }
}
