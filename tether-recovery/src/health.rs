//! Per-connection health scores
//!
//! A score starts at `1.0` and is multiplied by the failure's
//! [`Severity::health_factor`] each time a recovery run accounts for it. It
//! never goes up again; a fresh connection gets a fresh id and so a fresh
//! score.

use dashmap::DashMap;
use tether_common::{ConnectionId, Severity};

pub const FULL_HEALTH: f64 = 1.0;

#[derive(Debug, Default)]
pub struct HealthTable {
    scores: DashMap<ConnectionId, f64>,
}

impl HealthTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current score, `1.0` for connections that never failed
    #[must_use]
    pub fn get(&self, connection_id: ConnectionId) -> f64 {
        self.scores
            .get(&connection_id)
            .map_or(FULL_HEALTH, |score| *score)
    }

    /// Override the score, clamped to `[0, 1]`
    pub fn set(&self, connection_id: ConnectionId, score: f64) {
        self.scores
            .insert(connection_id, score.clamp(0.0, FULL_HEALTH));
    }

    /// Apply one failure of `severity`, returning the new score
    pub fn degrade(&self, connection_id: ConnectionId, severity: Severity) -> f64 {
        let mut score = self.scores.entry(connection_id).or_insert(FULL_HEALTH);
        *score *= severity.health_factor();
        *score
    }

    pub fn clear(&self, connection_id: ConnectionId) -> bool {
        self.scores.remove(&connection_id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
