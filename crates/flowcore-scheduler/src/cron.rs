//! Lightweight 5-field cron evaluator.
//!
//! Format: `minute hour day-of-month month day-of-week`.
//! Each field accepts `*`, `*/N`, `N`, `A-B`, `A-B/N`, `A/N` and comma lists.
//! Day-of-week runs 0-7 with both 0 and 7 meaning Sunday. A day field that
//! starts with `*` (`*`, `*/1`, `*/2`) is unrestricted; when both day fields
//! are restricted a day matches if either one does.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use flowcore_core::{FlowError, Result};

/// How many days ahead `next_after` looks before giving up. Covers leap days.
const SEARCH_DAYS: u32 = 366 * 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    any_day_of_month: bool,
    any_day_of_week: bool,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(FlowError::InvalidSchedule(format!(
                "'{expr}': expected 5 fields, found {}",
                fields.len()
            )));
        }

        let field = |index: usize, label: &str, min: u32, max: u32| {
            parse_field(fields[index], min, max).ok_or_else(|| {
                FlowError::InvalidSchedule(format!(
                    "'{expr}': bad {label} field '{}' (allowed {min}-{max})",
                    fields[index]
                ))
            })
        };

        let minutes = field(0, "minute", 0, 59)?;
        let hours = field(1, "hour", 0, 23)?;
        let days_of_month = field(2, "day-of-month", 1, 31)?;
        let months = field(3, "month", 1, 12)?;
        let days_of_week = field(4, "day-of-week", 0, 7)?
            .into_iter()
            .map(|d| d % 7)
            .collect();

        Ok(Self {
            source: fields.join(" "),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            any_day_of_month: fields[2].starts_with('*'),
            any_day_of_week: fields[4].starts_with('*'),
        })
    }

    pub fn is_valid(expr: &str) -> bool {
        Self::parse(expr).is_ok()
    }

    /// The expression with whitespace normalized.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when `at` falls inside a matching minute.
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        self.minutes.contains(&at.minute())
            && self.hours.contains(&at.hour())
            && self.day_matches(at.date_naive())
    }

    /// First matching minute strictly after `after`, or `None` if the
    /// expression never fires (e.g. February 30th).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = (after + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        let first_day = start.date_naive();
        let mut day = first_day;

        for _ in 0..SEARCH_DAYS {
            if self.day_matches(day) {
                let (from_hour, from_minute) = if day == first_day {
                    (start.hour(), start.minute())
                } else {
                    (0, 0)
                };
                for &hour in self.hours.range(from_hour..) {
                    let minute_floor = if hour == from_hour { from_minute } else { 0 };
                    if let Some(&minute) = self.minutes.range(minute_floor..).next() {
                        return day.and_hms_opt(hour, minute, 0).map(|t| t.and_utc());
                    }
                }
            }
            day = day.succ_opt()?;
        }
        None
    }

    fn day_matches(&self, day: NaiveDate) -> bool {
        if !self.months.contains(&day.month()) {
            return false;
        }
        let by_month_day = self.days_of_month.contains(&day.day());
        let by_week_day = self
            .days_of_week
            .contains(&day.weekday().num_days_from_sunday());
        if self.any_day_of_month || self.any_day_of_week {
            by_month_day && by_week_day
        } else {
            by_month_day || by_week_day
        }
    }
}

impl FromStr for CronExpr {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse one field into the set of values it selects.
fn parse_field(field: &str, min: u32, max: u32) -> Option<BTreeSet<u32>> {
    let mut values = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, step.parse::<u32>().ok().filter(|s| *s > 0)?),
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (a.parse().ok()?, b.parse().ok()?)
        } else {
            let value: u32 = range.parse().ok()?;
            // `5/15` means "from 5, every 15"
            if part.contains('/') { (value, max) } else { (value, value) }
        };

        if start < min || end > max || start > end {
            return None;
        }
        values.extend((start..=end).step_by(step as usize));
    }
    Some(values)
}
