//! Cascade audit trail: state transitions and per-attempt records.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Escalation state machine of one cascade invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CascadeState {
    NotStarted,
    Running { tier: String, attempt: u32 },
    Retrying { tier: String, attempt: u32, delay_ms: u64 },
    TimedOut { tier: String, attempt: u32 },
    Skipped { tier: String },
    Escalating { from: String, to: String },
    Succeeded { tier: String },
    AllTiersFailed,
    CascadeTimedOut,
}

impl CascadeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CascadeState::Succeeded { .. }
                | CascadeState::AllTiersFailed
                | CascadeState::CascadeTimedOut
        )
    }
}

impl fmt::Display for CascadeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeState::NotStarted => write!(f, "not started"),
            CascadeState::Running { tier, attempt } => write!(f, "running {tier} (attempt {attempt})"),
            CascadeState::Retrying { tier, attempt, delay_ms } => {
                write!(f, "retrying {tier} (attempt {attempt} in {delay_ms}ms)")
            }
            CascadeState::TimedOut { tier, attempt } => {
                write!(f, "{tier} timed out (attempt {attempt})")
            }
            CascadeState::Skipped { tier } => write!(f, "{tier} skipped"),
            CascadeState::Escalating { from, to } => write!(f, "escalating {from} → {to}"),
            CascadeState::Succeeded { tier } => write!(f, "succeeded at {tier}"),
            CascadeState::AllTiersFailed => write!(f, "all tiers failed"),
            CascadeState::CascadeTimedOut => write!(f, "cascade timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(flatten)]
    pub state: CascadeState,
    pub at: DateTime<Utc>,
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TierOutcome {
    Succeeded,
    Failed { reason: String },
    TimedOut { after_ms: u64 },
    Skipped { reason: String },
}

impl TierOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TierOutcome::Succeeded)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TierOutcome::Succeeded => "succeeded",
            TierOutcome::Failed { .. } => "failed",
            TierOutcome::TimedOut { .. } => "timed_out",
            TierOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// One row of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAttempt {
    pub tier: String,
    /// 1-based. `0` marks a tier skipped by its predicate without running.
    pub attempt: u32,
    #[serde(flatten)]
    pub outcome: TierOutcome,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Complete history of one cascade, kept on success and failure alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeMetrics {
    pub attempts: Vec<TierAttempt>,
    pub transitions: Vec<Transition>,
    pub started_at: DateTime<Utc>,
    pub total_duration: Duration,
}

impl CascadeMetrics {
    pub(crate) fn start() -> Self {
        let started_at = Utc::now();
        Self {
            attempts: Vec::new(),
            transitions: vec![Transition {
                state: CascadeState::NotStarted,
                at: started_at,
            }],
            started_at,
            total_duration: Duration::ZERO,
        }
    }

    pub(crate) fn enter(&mut self, state: CascadeState) {
        tracing::debug!("Cascade: {}", state);
        self.transitions.push(Transition {
            state,
            at: Utc::now(),
        });
    }

    /// Attempts recorded for one tier, in order.
    pub fn attempts_for(&self, tier: &str) -> Vec<&TierAttempt> {
        self.attempts.iter().filter(|a| a.tier == tier).collect()
    }

    /// Tiers whose handler actually ran, in order of first invocation.
    pub fn tiers_invoked(&self) -> Vec<&str> {
        let mut tiers: Vec<&str> = Vec::new();
        for attempt in self.attempts.iter().filter(|a| a.attempt > 0) {
            if !tiers.contains(&attempt.tier.as_str()) {
                tiers.push(&attempt.tier);
            }
        }
        tiers
    }

    pub fn final_state(&self) -> Option<&CascadeState> {
        self.transitions.last().map(|t| &t.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(tier: &str, attempt: u32, outcome: TierOutcome) -> TierAttempt {
        TierAttempt {
            tier: tier.into(),
            attempt,
            outcome,
            started_at: Utc::now(),
            duration: Duration::from_millis(3),
        }
    }

    #[test]
    fn test_queries() {
        let mut metrics = CascadeMetrics::start();
        metrics.attempts.push(attempt("code", 0, TierOutcome::Skipped { reason: "predicate".into() }));
        metrics.attempts.push(attempt("generative", 1, TierOutcome::TimedOut { after_ms: 50 }));
        metrics.attempts.push(attempt("generative", 2, TierOutcome::Succeeded));
        metrics.enter(CascadeState::Succeeded { tier: "generative".into() });

        assert_eq!(metrics.tiers_invoked(), vec!["generative"]);
        assert_eq!(metrics.attempts_for("generative").len(), 2);
        assert!(metrics.final_state().is_some_and(CascadeState::is_terminal));
    }

    #[test]
    fn test_attempt_serializes_flat() {
        let json = serde_json::to_value(attempt("human", 1, TierOutcome::Failed { reason: "rejected".into() })).unwrap();
        assert_eq!(json["tier"], "human");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"], "rejected");
    }
}
