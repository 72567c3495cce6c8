use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::CascadeMetrics;

/// Returned (through `anyhow`) by a tier handler that declines the request.
/// Recorded as a skip and never retried.
#[derive(Debug, Clone, thiserror::Error)]
#[error("tier skipped: {reason}")]
pub struct TierSkipped {
    pub reason: String,
}

impl TierSkipped {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Why one tier did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFailure {
    pub tier: String,
    /// Last failure reason seen for the tier.
    pub reason: String,
    /// Handler invocations (0 when skipped by predicate).
    pub attempts: u32,
    pub skipped: bool,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped {
            write!(f, "{}: skipped ({})", self.tier, self.reason)
        } else {
            write!(f, "{}: {} after {} attempt(s)", self.tier, self.reason, self.attempts)
        }
    }
}

fn summarize(reasons: &[TierFailure]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// Every tier failed or was skipped. `reasons` has one entry per tier,
    /// in tier order.
    #[error("all {} tiers failed: {}", .reasons.len(), summarize(.reasons))]
    AllTiersFailed {
        reasons: Vec<TierFailure>,
        metrics: CascadeMetrics,
    },

    /// The total cascade budget ran out.
    #[error("cascade timed out after {timeout:?} in tier {}", .tier.as_deref().unwrap_or("-"))]
    CascadeTimeout {
        timeout: Duration,
        /// Tier that was running (or about to run) when the budget expired.
        tier: Option<String>,
        metrics: CascadeMetrics,
    },
}

impl CascadeError {
    /// Audit trail up to the failure.
    pub fn metrics(&self) -> &CascadeMetrics {
        match self {
            CascadeError::AllTiersFailed { metrics, .. } | CascadeError::CascadeTimeout { metrics, .. } => {
                metrics
            }
        }
    }

    pub fn reasons(&self) -> &[TierFailure] {
        match self {
            CascadeError::AllTiersFailed { reasons, .. } => reasons,
            CascadeError::CascadeTimeout { .. } => &[],
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CascadeError::CascadeTimeout { .. })
    }
}
