use std::time::Duration;

use serde::Deserialize;

use crate::StrategyKind;

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_secs() -> u64 {
    60
}

const fn default_refuse_below() -> f64 {
    0.3
}

const fn default_unrecoverable_below() -> f64 {
    0.1
}

fn default_strategies() -> Vec<StrategyKind> {
    vec![StrategyKind::ExponentialBackoff, StrategyKind::StateSync]
}

/// Recovery tuning
///
/// ```ron
/// recovery: (
///     max_attempts: 5,
///     initial_backoff_ms: 1000,
///     max_backoff_secs: 60,
///     default_strategies: [ExponentialBackoff, StateSync],
/// ),
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RecoveryConfig {
    /// Attempt budget of one recovery run
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first backoff attempt, doubled after each attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the backoff delay
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// The circuit breaker refuses recovery when health is below this
    #[serde(default = "default_refuse_below")]
    pub refuse_below: f64,

    /// After degrading, health at or below this is considered unrecoverable
    #[serde(default = "default_unrecoverable_below")]
    pub unrecoverable_below: f64,

    /// Strategies tried, in order, when the caller names none
    #[serde(default = "default_strategies")]
    pub default_strategies: Vec<StrategyKind>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            refuse_below: default_refuse_below(),
            unrecoverable_below: default_unrecoverable_below(),
            default_strategies: default_strategies(),
        }
    }
}

impl RecoveryConfig {
    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Check the thresholds are usable
    ///
    /// # Errors
    /// A description of the first invalid field
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("recovery.max_attempts must be at least 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.refuse_below)
            || !(0.0..=1.0).contains(&self.unrecoverable_below)
        {
            return Err("recovery health thresholds must be within [0, 1]".to_string());
        }

        if self.unrecoverable_below > self.refuse_below {
            return Err(
                "recovery.unrecoverable_below must not exceed recovery.refuse_below".to_string(),
            );
        }

        if self.initial_backoff() > self.max_backoff() {
            return Err("recovery.initial_backoff_ms must not exceed max_backoff_secs".to_string());
        }

        Ok(())
    }
}
