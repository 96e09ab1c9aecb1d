//! State of one recovery run
//!
//! A [`RecoveryContext`] is created per `initiate_recovery` call and handed
//! mutably to each strategy in turn. Observers never see the context itself,
//! only [`RecoveryStatus`] copies the orchestrator publishes between
//! strategies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tether_common::{ConnectionFailure, ConnectionId, StateSnapshot, UserId};
use tokio::time::Instant;

use crate::StrategyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    Initiated,
    StrategyRunning,
    Succeeded,
    Exhausted,
}

impl RecoveryPhase {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub error: ConnectionFailure,
    /// Attempts consumed by backoff-style strategies in this run
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_attempt_time: Option<Instant>,
    /// Delay the next backoff attempt waits for, measured from `last_attempt_time`
    pub backoff_delay: Duration,
    pub strategies: Vec<StrategyKind>,
    pub state_snapshot: Option<StateSnapshot>,
    /// Free-form notes strategies leave for observers
    pub metadata: Map<String, Value>,
    pub(crate) phase: RecoveryPhase,
    pub(crate) current_strategy: Option<StrategyKind>,
    pub(crate) health_accounted: bool,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) started: Instant,
}

impl RecoveryContext {
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        user_id: UserId,
        error: ConnectionFailure,
        strategies: Vec<StrategyKind>,
        max_attempts: u32,
        backoff_delay: Duration,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            error,
            attempt_count: 0,
            max_attempts,
            last_attempt_time: None,
            backoff_delay,
            strategies,
            state_snapshot: None,
            metadata: Map::new(),
            phase: RecoveryPhase::Initiated,
            current_strategy: None,
            health_accounted: false,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Option<StateSnapshot>) -> Self {
        self.state_snapshot = snapshot;
        self
    }

    #[must_use]
    pub const fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    #[must_use]
    pub const fn current_strategy(&self) -> Option<&StrategyKind> {
        self.current_strategy.as_ref()
    }

    #[must_use]
    pub const fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Consume one attempt and stamp it
    pub fn record_attempt(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_time = Some(Instant::now());
    }

    /// Tell the orchestrator this run already applied the failure to the
    /// connection's health score, so it must not be applied again.
    pub const fn mark_health_accounted(&mut self) {
        self.health_accounted = true;
    }

    #[must_use]
    pub const fn health_accounted(&self) -> bool {
        self.health_accounted
    }

    pub(crate) fn begin(&mut self, strategy: StrategyKind) {
        self.phase = RecoveryPhase::StrategyRunning;
        self.current_strategy = Some(strategy);
    }

    pub(crate) fn finish(&mut self, succeeded: bool) {
        self.phase = if succeeded {
            RecoveryPhase::Succeeded
        } else {
            RecoveryPhase::Exhausted
        };
    }

    #[must_use]
    pub fn status(&self) -> RecoveryStatus {
        RecoveryStatus {
            connection_id: self.connection_id,
            user_id: self.user_id.clone(),
            phase: self.phase,
            current_strategy: self.current_strategy.clone(),
            strategies: self.strategies.clone(),
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            backoff_delay_ms: u64::try_from(self.backoff_delay.as_millis()).unwrap_or(u64::MAX),
            error: self.error.clone(),
            has_state_snapshot: self.state_snapshot.is_some(),
            metadata: self.metadata.clone(),
            started_at: self.started_at,
        }
    }
}

/// Read-only view of a recovery run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStatus {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub phase: RecoveryPhase,
    pub current_strategy: Option<StrategyKind>,
    pub strategies: Vec<StrategyKind>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub backoff_delay_ms: u64,
    pub error: ConnectionFailure,
    pub has_state_snapshot: bool,
    pub metadata: Map<String, Value>,
    pub started_at: DateTime<Utc>,
}
