//! The cascade executor: try tiers in order until one succeeds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowcore_core::config::CascadeSettings;
use flowcore_core::{record_quietly, ActionRecord, ActionRecorder, NoopRecorder, RecordKind};
use tokio::time::Instant;

use crate::error::{CascadeError, TierFailure, TierSkipped};
use crate::metrics::{CascadeMetrics, CascadeState, TierAttempt, TierOutcome};
use crate::retry::RetryPolicy;
use crate::tier::{default_tier_timeout, Tier};

/// Executor-wide defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeConfig {
    /// Timeouts keyed by lowercase tier name.
    pub tier_timeouts: BTreeMap<String, Duration>,
    /// Timeout for tiers absent from `tier_timeouts`; `None` uses the
    /// built-in default for the tier name.
    pub default_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub total_timeout: Option<Duration>,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            tier_timeouts: BTreeMap::new(),
            default_timeout: None,
            retry: RetryPolicy::default(),
            total_timeout: None,
        }
    }
}

impl CascadeConfig {
    pub fn from_settings(settings: &CascadeSettings) -> Self {
        Self {
            tier_timeouts: settings
                .tier_timeouts_secs
                .iter()
                .map(|(name, secs)| (name.to_ascii_lowercase(), Duration::from_secs(*secs)))
                .collect(),
            default_timeout: Some(Duration::from_secs(settings.default_timeout_secs)),
            retry: RetryPolicy::from_settings(settings),
            total_timeout: settings.total_timeout(),
        }
    }

    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tier_timeout(mut self, tier: &str, timeout: Duration) -> Self {
        self.tier_timeouts.insert(tier.to_ascii_lowercase(), timeout);
        self
    }

    pub fn timeout_for(&self, tier: &str) -> Duration {
        self.tier_timeouts
            .get(&tier.to_ascii_lowercase())
            .copied()
            .or(self.default_timeout)
            .unwrap_or_else(|| default_tier_timeout(tier))
    }
}

/// Per-call overrides. These win over both the tier's own policy and the
/// executor configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeOverrides {
    pub tier_timeouts: BTreeMap<String, Duration>,
    pub retry: Option<RetryPolicy>,
    pub total_timeout: Option<Duration>,
}

impl CascadeOverrides {
    pub fn tier_timeout(mut self, tier: &str, timeout: Duration) -> Self {
        self.tier_timeouts.insert(tier.to_ascii_lowercase(), timeout);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }
}

/// Successful cascade.
#[derive(Debug, Clone)]
pub struct CascadeResult<O> {
    /// Name of the tier that produced `output`.
    pub tier: String,
    pub output: O,
    pub metrics: CascadeMetrics,
}

/// Runs a fixed, ordered list of tiers.
pub struct CascadeExecutor<I, O> {
    tiers: Vec<Tier<I, O>>,
    config: CascadeConfig,
    recorder: Arc<dyn ActionRecorder>,
}

enum AttemptEnd<O> {
    Success(O),
    Failed(String),
    TimedOut,
    Skipped(String),
    /// The total budget expired during the attempt.
    BudgetExpired,
}

impl<I, O> CascadeExecutor<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(tiers: Vec<Tier<I, O>>) -> Self {
        Self {
            tiers,
            config: CascadeConfig::default(),
            recorder: Arc::new(NoopRecorder),
        }
    }

    pub fn with_config(mut self, config: CascadeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ActionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    pub fn tier_names(&self) -> Vec<&str> {
        self.tiers.iter().map(Tier::name).collect()
    }

    pub async fn execute(&self, input: I) -> Result<CascadeResult<O>, CascadeError> {
        self.execute_with(input, &CascadeOverrides::default()).await
    }

    /// Run the cascade with per-call overrides.
    pub async fn execute_with(
        &self,
        input: I,
        overrides: &CascadeOverrides,
    ) -> Result<CascadeResult<O>, CascadeError> {
        let outcome = self.run(Arc::new(input), overrides).await;
        self.record(&outcome).await;
        outcome
    }

    async fn run(
        &self,
        input: Arc<I>,
        overrides: &CascadeOverrides,
    ) -> Result<CascadeResult<O>, CascadeError> {
        let clock = Instant::now();
        let total_timeout = overrides.total_timeout.or(self.config.total_timeout);
        let deadline = total_timeout.map(|t| clock + t);
        let mut metrics = CascadeMetrics::start();
        let mut reasons: Vec<TierFailure> = Vec::with_capacity(self.tiers.len());

        let expired = |metrics: &mut CascadeMetrics, tier: Option<&str>| {
            tracing::warn!(
                "⏱️ Cascade budget of {:?} exhausted{}",
                total_timeout.unwrap_or_default(),
                tier.map(|t| format!(" in tier {t}")).unwrap_or_default()
            );
            metrics.enter(CascadeState::CascadeTimedOut);
            metrics.total_duration = clock.elapsed();
            CascadeError::CascadeTimeout {
                timeout: total_timeout.unwrap_or_default(),
                tier: tier.map(str::to_string),
                metrics: metrics.clone(),
            }
        };

        for (position, tier) in self.tiers.iter().enumerate() {
            let name = tier.name();
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(expired(&mut metrics, Some(name)));
            }

            if tier.should_skip(&input) {
                tracing::debug!("⏭️ Cascade: skipping tier {} (predicate)", name);
                metrics.attempts.push(TierAttempt {
                    tier: name.to_string(),
                    attempt: 0,
                    outcome: TierOutcome::Skipped {
                        reason: "skip predicate matched".into(),
                    },
                    started_at: Utc::now(),
                    duration: Duration::ZERO,
                });
                metrics.enter(CascadeState::Skipped { tier: name.to_string() });
                reasons.push(TierFailure {
                    tier: name.to_string(),
                    reason: "skip predicate matched".into(),
                    attempts: 0,
                    skipped: true,
                });
                self.escalate(&mut metrics, position);
                continue;
            }

            let timeout = overrides
                .tier_timeouts
                .get(&name.to_ascii_lowercase())
                .copied()
                .or(tier.policy().timeout)
                .unwrap_or_else(|| self.config.timeout_for(name));
            let retry = overrides
                .retry
                .or(tier.policy().retry)
                .unwrap_or(self.config.retry);

            let mut attempt: u32 = 1;
            loop {
                metrics.enter(CascadeState::Running {
                    tier: name.to_string(),
                    attempt,
                });
                let started_at = Utc::now();
                let attempt_clock = Instant::now();
                let end = self.attempt(tier, &input, timeout, deadline).await;
                let duration = attempt_clock.elapsed();

                let outcome = match &end {
                    AttemptEnd::Success(_) => TierOutcome::Succeeded,
                    AttemptEnd::Failed(reason) => TierOutcome::Failed {
                        reason: reason.clone(),
                    },
                    AttemptEnd::Skipped(reason) => TierOutcome::Skipped {
                        reason: reason.clone(),
                    },
                    AttemptEnd::TimedOut | AttemptEnd::BudgetExpired => TierOutcome::TimedOut {
                        after_ms: duration.as_millis() as u64,
                    },
                };
                metrics.attempts.push(TierAttempt {
                    tier: name.to_string(),
                    attempt,
                    outcome,
                    started_at,
                    duration,
                });

                let reason = match end {
                    AttemptEnd::Success(output) => {
                        metrics.enter(CascadeState::Succeeded { tier: name.to_string() });
                        metrics.total_duration = clock.elapsed();
                        if position > 0 {
                            tracing::info!(
                                "🔄 Cascade: {} → {} (success)",
                                self.tiers[0].name(),
                                name
                            );
                        }
                        return Ok(CascadeResult {
                            tier: name.to_string(),
                            output,
                            metrics,
                        });
                    }
                    AttemptEnd::BudgetExpired => return Err(expired(&mut metrics, Some(name))),
                    AttemptEnd::Skipped(reason) => {
                        tracing::debug!("⏭️ Cascade: tier {} declined: {}", name, reason);
                        metrics.enter(CascadeState::Skipped { tier: name.to_string() });
                        reasons.push(TierFailure {
                            tier: name.to_string(),
                            reason,
                            attempts: attempt,
                            skipped: true,
                        });
                        break;
                    }
                    AttemptEnd::TimedOut => {
                        metrics.enter(CascadeState::TimedOut {
                            tier: name.to_string(),
                            attempt,
                        });
                        format!("timed out after {timeout:?}")
                    }
                    AttemptEnd::Failed(reason) => reason,
                };

                if !retry.allows_retry(attempt - 1) {
                    tracing::warn!(
                        "⚠️ Tier {} failed (attempt {}): {}",
                        name,
                        attempt,
                        reason
                    );
                    reasons.push(TierFailure {
                        tier: name.to_string(),
                        reason,
                        attempts: attempt,
                        skipped: false,
                    });
                    break;
                }

                let delay = retry.delay_for(attempt - 1);
                tracing::warn!(
                    "⚠️ Tier {} failed (attempt {}): {}, retrying in {:?}",
                    name,
                    attempt,
                    reason,
                    delay
                );
                metrics.enter(CascadeState::Retrying {
                    tier: name.to_string(),
                    attempt: attempt + 1,
                    delay_ms: delay.as_millis() as u64,
                });
                match deadline {
                    Some(deadline) if Instant::now() + delay >= deadline => {
                        tokio::time::sleep_until(deadline).await;
                        return Err(expired(&mut metrics, Some(name)));
                    }
                    _ => tokio::time::sleep(delay).await,
                }
                attempt += 1;
            }

            self.escalate(&mut metrics, position);
        }

        metrics.enter(CascadeState::AllTiersFailed);
        metrics.total_duration = clock.elapsed();
        tracing::warn!(
            "❌ Cascade exhausted {} tier(s) without success",
            self.tiers.len()
        );
        Err(CascadeError::AllTiersFailed { reasons, metrics })
    }

    fn escalate(&self, metrics: &mut CascadeMetrics, position: usize) {
        if let Some(next) = self.tiers.get(position + 1) {
            metrics.enter(CascadeState::Escalating {
                from: self.tiers[position].name().to_string(),
                to: next.name().to_string(),
            });
        }
    }

    /// One handler invocation on its own task, bounded by the tier timeout
    /// and the cascade deadline, whichever is earlier.
    async fn attempt(
        &self,
        tier: &Tier<I, O>,
        input: &Arc<I>,
        timeout: Duration,
        deadline: Option<Instant>,
    ) -> AttemptEnd<O> {
        let tier_deadline = Instant::now() + timeout;
        let (until, budget_bound) = match deadline {
            Some(deadline) if deadline < tier_deadline => (deadline, true),
            _ => (tier_deadline, false),
        };

        let handler = tier.handler.clone();
        let input = input.clone();
        let mut task = tokio::spawn(async move { handler.handle(input).await });

        match tokio::time::timeout_at(until, &mut task).await {
            Ok(Ok(Ok(output))) => AttemptEnd::Success(output),
            Ok(Ok(Err(e))) => match e.downcast_ref::<TierSkipped>() {
                Some(skip) => AttemptEnd::Skipped(skip.reason.clone()),
                None => AttemptEnd::Failed(format!("{e:#}")),
            },
            Ok(Err(join_err)) => AttemptEnd::Failed(panic_reason(join_err)),
            Err(_) => {
                if tier.policy().cancel_on_timeout {
                    tracing::debug!("Cascade: aborting timed-out tier {}", tier.name());
                    task.abort();
                }
                // Otherwise dropping the handle leaves the work running.
                if budget_bound {
                    AttemptEnd::BudgetExpired
                } else {
                    AttemptEnd::TimedOut
                }
            }
        }
    }

    async fn record(&self, outcome: &Result<CascadeResult<O>, CascadeError>) {
        let subject = self.tier_names().join(",");
        let (label, metrics) = match outcome {
            Ok(result) => ("succeeded", &result.metrics),
            Err(CascadeError::AllTiersFailed { metrics, .. }) => ("all_tiers_failed", metrics),
            Err(CascadeError::CascadeTimeout { metrics, .. }) => ("timed_out", metrics),
        };
        let detail = serde_json::to_value(metrics).unwrap_or_default();
        record_quietly(
            self.recorder.as_ref(),
            ActionRecord::new(RecordKind::Cascade, &subject, label, detail),
        )
        .await;
    }
}

fn panic_reason(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return "handler task was cancelled".into();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| format!("handler panicked: {s}"))
        .or_else(|| {
            payload
                .downcast_ref::<String>()
                .map(|s| format!("handler panicked: {s}"))
        })
        .unwrap_or_else(|| "handler panicked".into())
}
