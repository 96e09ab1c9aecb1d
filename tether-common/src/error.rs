//! Failure classification shared by the transport layer and recovery.
//!
//! Whatever detects a broken connection describes it with a
//! [`ConnectionFailure`]; recovery only looks at the [`Severity`].

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// How badly a failure hurt the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Multiplier applied to a connection's health score for one failure of
    /// this severity.
    #[must_use]
    pub const fn health_factor(self) -> f64 {
        match self {
            Self::Critical => 0.5,
            Self::High => 0.7,
            Self::Medium | Self::Low => 0.9,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        })
    }
}

/// Broad origin of a connection failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Protocol,
    Authentication,
    Resource,
    Unknown,
}

/// A classified failure reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{category:?} failure ({severity}): {message}")]
pub struct ConnectionFailure {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
}

impl ConnectionFailure {
    pub fn new(category: ErrorCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
        }
    }

    /// Returns `true` for failures that should only be retried cautiously.
    #[must_use]
    pub const fn is_severe(&self) -> bool {
        matches!(self.severity, Severity::High | Severity::Critical)
    }
}
