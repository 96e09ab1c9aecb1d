//! Recovery orchestration
//!
//! ```text
//! Initiated ──> StrategyRunning ──┬──> Succeeded ──> removed
//!                  ^      │       │
//!                  └──────┘       └──> Exhausted ──> removed
//!              (next strategy)
//! ```
//!
//! The run owns its [`RecoveryContext`]; the active map only ever holds a
//! [`RecoveryStatus`] copy, refreshed whenever the run moves to another
//! strategy. Nothing is locked across a strategy's await.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use ahash::AHashMap;
use dashmap::{DashMap, mapref::entry::Entry};
use futures_util::FutureExt;
use parking_lot::RwLock;
use tether_common::{
    ConnectionFailure, ConnectionId, StateSnapshot, Sweep, TelemetryCounters, UserId, recovery,
};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    AcknowledgeRestorer, CircuitBreaker, ExponentialBackoff, HealthTable, Immediate,
    RecoveryConfig, RecoveryContext, RecoveryStatus, SnapshotRestorer, StateSync, Strategy,
    StrategyKind,
};

#[derive(Debug, Clone)]
struct ActiveRecovery {
    run: u64,
    started: Instant,
    status: RecoveryStatus,
}

pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    counters: Arc<TelemetryCounters>,
    health: Arc<HealthTable>,
    snapshots: DashMap<ConnectionId, StateSnapshot>,
    active: DashMap<ConnectionId, ActiveRecovery>,
    handlers: RwLock<AHashMap<StrategyKind, Arc<dyn Strategy>>>,
    next_run: AtomicU64,
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("config", &self.config)
            .field("active", &self.active.len())
            .field("snapshots", &self.snapshots.len())
            .field("handlers", &self.handlers.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RecoveryOrchestrator {
    /// Create an orchestrator with the four built-in strategies registered.
    #[must_use]
    pub fn new(config: RecoveryConfig, counters: Arc<TelemetryCounters>) -> Self {
        let health = Arc::new(HealthTable::new());

        let mut handlers: AHashMap<StrategyKind, Arc<dyn Strategy>> = AHashMap::new();
        handlers.insert(StrategyKind::Immediate, Arc::new(Immediate));
        handlers.insert(
            StrategyKind::ExponentialBackoff,
            Arc::new(ExponentialBackoff::new(config.max_backoff())),
        );
        handlers.insert(
            StrategyKind::CircuitBreaker,
            Arc::new(CircuitBreaker::new(
                health.clone(),
                counters.clone(),
                config.refuse_below,
                config.unrecoverable_below,
            )),
        );
        handlers.insert(
            StrategyKind::StateSync,
            Arc::new(StateSync::new(Arc::new(AcknowledgeRestorer))),
        );

        Self {
            config,
            counters,
            health,
            snapshots: DashMap::new(),
            active: DashMap::new(),
            handlers: RwLock::new(handlers),
            next_run: AtomicU64::new(0),
        }
    }

    /// Replace the restorer used by the built-in `StateSync` strategy
    #[must_use]
    pub fn with_restorer(self, restorer: Arc<dyn SnapshotRestorer>) -> Self {
        self.register_recovery_handler(
            StrategyKind::StateSync,
            Arc::new(StateSync::new(restorer)),
        );
        self
    }

    #[must_use]
    pub const fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Add a strategy, or replace the one registered under `kind`
    pub fn register_recovery_handler(&self, kind: StrategyKind, handler: Arc<dyn Strategy>) {
        if self.handlers.write().insert(kind.clone(), handler).is_some() {
            recovery!("Recovery strategy {kind} replaced");
        } else {
            recovery!("Recovery strategy {kind} registered");
        }
    }

    /// Try to bring a failed connection back.
    ///
    /// Runs `strategies` (or the configured defaults when `None` or empty) in
    /// order until one succeeds. Returns `false` when every strategy failed
    /// or the attempt budget ran out. Callers must not run two recoveries for
    /// the same connection at once.
    pub async fn initiate_recovery(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        error: ConnectionFailure,
        strategies: Option<Vec<StrategyKind>>,
    ) -> bool {
        let strategies = strategies
            .filter(|strategies| !strategies.is_empty())
            .unwrap_or_else(|| self.config.default_strategies.clone());
        let snapshot = self.get_state_snapshot(connection_id);
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);

        let mut ctx = RecoveryContext::new(
            connection_id,
            user_id,
            error,
            strategies,
            self.config.max_attempts,
            self.config.initial_backoff(),
        )
        .with_snapshot(snapshot);

        self.counters.record_error_handled();
        info!(
            %connection_id,
            user_id = %ctx.user_id,
            severity = %ctx.error.severity,
            error = %ctx.error.message,
            strategies = ?ctx.strategies,
            "Recovery initiated"
        );
        self.publish(run, &ctx);

        let succeeded = self.run_strategies(run, &mut ctx).await;

        if !ctx.health_accounted() {
            let health = self.health.degrade(connection_id, ctx.error.severity);
            debug!(%connection_id, health, "Connection health degraded");
        }

        ctx.finish(succeeded);
        self.active
            .remove_if(&connection_id, |_, active| active.run == run);
        self.counters.record_recovery(succeeded);

        if succeeded {
            info!(
                %connection_id,
                user_id = %ctx.user_id,
                strategy = ?ctx.current_strategy().map(ToString::to_string),
                attempts = ctx.attempt_count,
                "Recovery succeeded"
            );
        } else {
            warn!(
                %connection_id,
                user_id = %ctx.user_id,
                attempts = ctx.attempt_count,
                max_attempts = ctx.max_attempts,
                "Recovery exhausted"
            );
        }

        succeeded
    }

    async fn run_strategies(&self, run: u64, ctx: &mut RecoveryContext) -> bool {
        for kind in ctx.strategies.clone() {
            if ctx.attempts_exhausted() {
                warn!(
                    connection_id = %ctx.connection_id,
                    attempts = ctx.attempt_count,
                    "Recovery attempt budget spent"
                );
                return false;
            }

            ctx.begin(kind.clone());
            self.publish(run, ctx);

            let handler = self.handlers.read().get(&kind).cloned();
            let Some(handler) = handler else {
                warn!(
                    connection_id = %ctx.connection_id,
                    strategy = %kind,
                    "No handler registered for recovery strategy"
                );
                continue;
            };

            debug!(
                connection_id = %ctx.connection_id,
                strategy = %kind,
                "Running recovery strategy"
            );

            match AssertUnwindSafe(handler.execute(ctx)).catch_unwind().await {
                Ok(Ok(true)) => return true,
                Ok(Ok(false)) => {
                    debug!(
                        connection_id = %ctx.connection_id,
                        strategy = %kind,
                        "Recovery strategy failed"
                    );
                }
                Ok(Err(reason)) => {
                    warn!(
                        connection_id = %ctx.connection_id,
                        strategy = %kind,
                        %reason,
                        "Recovery strategy failed"
                    );
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    error!(
                        connection_id = %ctx.connection_id,
                        strategy = %kind,
                        panic = %message,
                        "Recovery strategy panicked"
                    );
                }
            }
        }

        false
    }

    /// Refresh the status copy of run `run`. A later run for the same
    /// connection takes the slot over; an earlier one never does.
    fn publish(&self, run: u64, ctx: &RecoveryContext) {
        let status = ctx.status();
        match self.active.entry(ctx.connection_id) {
            Entry::Occupied(mut entry) if entry.get().run == run => {
                entry.get_mut().status = status;
            }
            Entry::Occupied(entry) if entry.get().run > run => {}
            Entry::Occupied(mut entry) => {
                entry.insert(ActiveRecovery {
                    run,
                    started: Instant::now(),
                    status,
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(ActiveRecovery {
                    run,
                    started: Instant::now(),
                    status,
                });
            }
        }
    }

    /// Status of the recovery currently running for `connection_id`
    #[must_use]
    pub fn get_recovery_status(&self, connection_id: ConnectionId) -> Option<RecoveryStatus> {
        self.active
            .get(&connection_id)
            .map(|active| active.status.clone())
    }

    #[must_use]
    pub fn active_recoveries(&self) -> usize {
        self.active.len()
    }

    /// Keep `snapshot` for the next recovery of `connection_id`
    pub fn save_state_snapshot(&self, connection_id: ConnectionId, snapshot: StateSnapshot) {
        self.snapshots.insert(connection_id, snapshot);
        debug!(%connection_id, "State snapshot saved");
    }

    #[must_use]
    pub fn get_state_snapshot(&self, connection_id: ConnectionId) -> Option<StateSnapshot> {
        self.snapshots
            .get(&connection_id)
            .map(|snapshot| snapshot.value().clone())
    }

    /// Forget the snapshot and health score of `connection_id`.
    ///
    /// Returns the snapshot if there was one.
    pub fn clear_state_snapshot(&self, connection_id: ConnectionId) -> Option<StateSnapshot> {
        self.health.clear(connection_id);
        self.snapshots
            .remove(&connection_id)
            .map(|(_, snapshot)| snapshot)
    }

    /// Drop the health score of a closed connection. Its snapshot is kept.
    pub fn release_connection(&self, connection_id: ConnectionId) -> bool {
        let released = self.health.clear(connection_id);
        if released {
            debug!(%connection_id, "Health score released");
        }
        released
    }

    #[must_use]
    pub fn connection_health(&self, connection_id: ConnectionId) -> f64 {
        self.health.get(connection_id)
    }

    #[must_use]
    pub fn health(&self) -> &HealthTable {
        &self.health
    }

    /// Drop status entries of runs that started more than `max_age` ago
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let before = self.active.len();
        self.active
            .retain(|_, active| active.started.elapsed() <= max_age);
        let removed = before.saturating_sub(self.active.len());

        if removed > 0 {
            warn!(removed, "Removed stale recovery entries");
        }

        removed
    }
}

impl Sweep for RecoveryOrchestrator {
    fn name(&self) -> &'static str {
        "recovery-contexts"
    }

    fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_stale(max_age)
    }
}
