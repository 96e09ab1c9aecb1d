//! Health-gated recovery
//!
//! The breaker is open when the connection's health score is below the
//! refuse threshold. While open every recovery attempt is refused outright
//! and the score is left alone. While closed each attempt accounts the
//! failure against the score; an attempt that leaves the score at or below
//! the unrecoverable threshold fails.
//!
//! ```text
//! health: 1.0 ──critical──> 0.5 ──critical──> 0.25 ──> refused (open)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tether_common::TelemetryCounters;
use tracing::{debug, warn};

use super::Strategy;
use crate::{FailureReason, HealthTable, RecoveryContext};

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    health: Arc<HealthTable>,
    counters: Arc<TelemetryCounters>,
    refuse_below: f64,
    unrecoverable_below: f64,
}

impl CircuitBreaker {
    #[must_use]
    pub const fn new(
        health: Arc<HealthTable>,
        counters: Arc<TelemetryCounters>,
        refuse_below: f64,
        unrecoverable_below: f64,
    ) -> Self {
        Self {
            health,
            counters,
            refuse_below,
            unrecoverable_below,
        }
    }
}

#[async_trait]
impl Strategy for CircuitBreaker {
    async fn execute(&self, ctx: &mut RecoveryContext) -> Result<bool, FailureReason> {
        let connection_id = ctx.connection_id;
        let health = self.health.get(connection_id);
        ctx.mark_health_accounted();

        if health < self.refuse_below {
            self.counters.record_circuit_break();
            warn!(
                %connection_id,
                user_id = %ctx.user_id,
                health,
                "Circuit open, refusing recovery"
            );
            return Err(FailureReason::CircuitOpen {
                health,
                threshold: self.refuse_below,
            });
        }

        let degraded = self.health.degrade(connection_id, ctx.error.severity);
        ctx.metadata
            .insert("health".to_string(), serde_json::json!(degraded));

        if degraded > self.unrecoverable_below {
            debug!(%connection_id, health = degraded, "Circuit closed");
            Ok(true)
        } else {
            self.counters.record_circuit_break();
            warn!(
                %connection_id,
                user_id = %ctx.user_id,
                health = degraded,
                "Connection health unrecoverable"
            );
            Err(FailureReason::Unrecoverable { health: degraded })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tether_common::{ConnectionFailure, ConnectionId, ErrorCategory, Severity, UserId};

    use super::*;
    use crate::StrategyKind;

    fn breaker(health: &Arc<HealthTable>, counters: &Arc<TelemetryCounters>) -> CircuitBreaker {
        CircuitBreaker::new(health.clone(), counters.clone(), 0.3, 0.1)
    }

    fn context(connection_id: ConnectionId, severity: Severity) -> RecoveryContext {
        RecoveryContext::new(
            connection_id,
            UserId::from("u1"),
            ConnectionFailure::new(ErrorCategory::Network, severity, "reset"),
            vec![StrategyKind::CircuitBreaker],
            5,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_critical_failures_decay_until_refused() {
        let health = Arc::new(HealthTable::new());
        let counters = Arc::new(TelemetryCounters::new());
        let breaker = breaker(&health, &counters);
        let id = ConnectionId::generate();

        let mut previous = health.get(id);
        loop {
            let mut ctx = context(id, Severity::Critical);
            let result = breaker.execute(&mut ctx).await;
            assert!(ctx.health_accounted());

            if previous < 0.3 {
                assert!(matches!(result, Err(FailureReason::CircuitOpen { .. })));
                assert!((health.get(id) - previous).abs() < f64::EPSILON);
                break;
            }

            assert_eq!(result, Ok(true));
            let current = health.get(id);
            assert!(current < previous);
            previous = current;
        }

        assert_eq!(counters.snapshot().circuit_breaks, 1);
    }

    #[tokio::test]
    async fn test_refusal_leaves_health_untouched() {
        let health = Arc::new(HealthTable::new());
        let counters = Arc::new(TelemetryCounters::new());
        let id = ConnectionId::generate();
        health.set(id, 0.2);

        let mut ctx = context(id, Severity::Low);
        let result = breaker(&health, &counters).execute(&mut ctx).await;

        assert!(result.is_err_and(|reason| reason.is_circuit_break()));
        assert!((health.get(id) - 0.2).abs() < f64::EPSILON);
        assert_eq!(ctx.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_degrading_to_unrecoverable_fails() {
        let health = Arc::new(HealthTable::new());
        let counters = Arc::new(TelemetryCounters::new());
        let id = ConnectionId::generate();
        health.set(id, 0.3);

        // 0.3 is not below the refuse threshold; 0.3 * 0.5 = 0.15 stays above 0.1
        let mut ctx = context(id, Severity::Critical);
        assert_eq!(breaker(&health, &counters).execute(&mut ctx).await, Ok(true));

        health.set(id, 0.3);
        let mut ctx = context(id, Severity::Critical);
        let strict = CircuitBreaker::new(health.clone(), counters.clone(), 0.3, 0.2);
        assert!(matches!(
            strict.execute(&mut ctx).await,
            Err(FailureReason::Unrecoverable { .. })
        ));
        assert_eq!(counters.snapshot().circuit_breaks, 1);
    }
}
