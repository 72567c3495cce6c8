//! Schedule specifications and the resolver contract.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowcore_core::{FlowError, Result};
use serde::{Deserialize, Serialize};

use crate::cron::CronExpr;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Repeatedly, this long after the previous run (first run one interval
    /// after scheduling).
    Interval(Duration),
    /// Once, at this instant.
    At(DateTime<Utc>),
    /// Whenever the 5-field cron expression matches.
    Cron(String),
}

/// Turns a human description ("every weekday at 9") into a [`ScheduleSpec`].
///
/// The scheduler never interprets natural language itself; callers plug a
/// resolver in. Closures `Fn(&str) -> Option<ScheduleSpec>` implement this.
pub trait ScheduleResolver: Send + Sync {
    fn resolve(&self, description: &str) -> Option<ScheduleSpec>;
}

impl<F> ScheduleResolver for F
where
    F: Fn(&str) -> Option<ScheduleSpec> + Send + Sync,
{
    fn resolve(&self, description: &str) -> Option<ScheduleSpec> {
        (self)(description)
    }
}

impl ScheduleSpec {
    pub fn every(interval: Duration) -> Self {
        ScheduleSpec::Interval(interval)
    }

    pub fn at(when: DateTime<Utc>) -> Self {
        ScheduleSpec::At(when)
    }

    /// A cron schedule, validated up front.
    pub fn cron(expr: &str) -> Result<Self> {
        let parsed = CronExpr::parse(expr)?;
        Ok(ScheduleSpec::Cron(parsed.as_str().to_string()))
    }

    /// Accept a cron expression as-is, otherwise ask `resolver`.
    ///
    /// Fails with [`FlowError::UnknownSchedulePattern`] when the description
    /// is not cron and no resolver recognizes it. A resolver answer is
    /// validated like any other spec.
    pub fn resolve(description: &str, resolver: Option<&dyn ScheduleResolver>) -> Result<Self> {
        let description = description.trim();
        if CronExpr::is_valid(description) {
            return Self::cron(description);
        }

        let resolved = resolver
            .and_then(|r| r.resolve(description))
            .ok_or_else(|| FlowError::UnknownSchedulePattern(description.to_string()))?;
        resolved.validate()?;
        tracing::debug!("📅 Resolved '{}' to {}", description, resolved);
        Ok(resolved)
    }

    /// Reject zero intervals and unparsable cron strings.
    pub fn validate(&self) -> Result<()> {
        match self {
            ScheduleSpec::Interval(interval) if interval.is_zero() => Err(
                FlowError::InvalidSchedule("interval must be greater than zero".into()),
            ),
            ScheduleSpec::Cron(expr) => CronExpr::parse(expr).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Next firing time strictly after `after`.
    ///
    /// `None` means the schedule is exhausted: a one-shot whose time has
    /// passed, or a cron expression that never matches.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self {
            ScheduleSpec::Interval(interval) => {
                let step = chrono::Duration::from_std(*interval)
                    .map_err(|e| FlowError::InvalidSchedule(format!("interval {interval:?}: {e}")))?;
                Ok(after.checked_add_signed(step))
            }
            ScheduleSpec::At(when) => Ok((*when > after).then_some(*when)),
            ScheduleSpec::Cron(expr) => Ok(CronExpr::parse(expr)?.next_after(after)),
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, ScheduleSpec::At(_))
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleSpec::Interval(interval) => write!(f, "every {interval:?}"),
            ScheduleSpec::At(when) => write!(f, "at {}", when.to_rfc3339()),
            ScheduleSpec::Cron(expr) => write!(f, "cron '{expr}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn weekday_mornings(description: &str) -> Option<ScheduleSpec> {
        (description == "every weekday at 9").then(|| ScheduleSpec::Cron("0 9 * * 1-5".into()))
    }

    #[test]
    fn test_cron_accepted_without_resolver() {
        let spec = ScheduleSpec::resolve("  */5 * * * * ", None).unwrap();
        assert_eq!(spec, ScheduleSpec::Cron("*/5 * * * *".into()));
    }

    #[test]
    fn test_unknown_pattern_without_resolver() {
        let err = ScheduleSpec::resolve("every weekday at 9", None).unwrap_err();
        assert!(matches!(err, FlowError::UnknownSchedulePattern(ref d) if d == "every weekday at 9"));
    }

    #[test]
    fn test_resolver_hit_and_miss() {
        let resolver = weekday_mornings;
        let spec = ScheduleSpec::resolve("every weekday at 9", Some(&resolver)).unwrap();
        assert_eq!(spec, ScheduleSpec::Cron("0 9 * * 1-5".into()));

        let err = ScheduleSpec::resolve("twice a fortnight", Some(&resolver)).unwrap_err();
        assert!(matches!(err, FlowError::UnknownSchedulePattern(_)));
    }

    #[test]
    fn test_resolver_answer_is_validated() {
        let broken = |_: &str| Some(ScheduleSpec::Cron("99 * * * *".into()));
        let err = ScheduleSpec::resolve("hourly-ish", Some(&broken)).unwrap_err();
        assert!(matches!(err, FlowError::InvalidSchedule(_)));

        let zero = |_: &str| Some(ScheduleSpec::every(Duration::ZERO));
        assert!(ScheduleSpec::resolve("constantly", Some(&zero)).is_err());
    }

    #[test]
    fn test_next_after() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();

        let interval = ScheduleSpec::every(Duration::from_secs(90));
        assert_eq!(
            interval.next_after(now).unwrap(),
            Some(now + chrono::Duration::seconds(90))
        );

        let later = now + chrono::Duration::hours(1);
        assert_eq!(ScheduleSpec::at(later).next_after(now).unwrap(), Some(later));
        assert_eq!(ScheduleSpec::at(now).next_after(now).unwrap(), None);

        let cron = ScheduleSpec::cron("0 9 * * 1-5").unwrap();
        assert_eq!(
            cron.next_after(now).unwrap(),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(ScheduleSpec::Cron("0 * * * *".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "cron", "value": "0 * * * *"}));
        assert!(!ScheduleSpec::at(Utc::now()).is_recurring());
    }
}
