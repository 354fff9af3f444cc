//! Cron parsing and granularity inference (spec.md §4.C').
//!
//! `cron_next`/`cron_prev`/`cron_floor` are computed against the
//! *normalized* cron so a job declared `@daily at 13:00` is
//! indistinguishable from `@daily` for interval arithmetic, per
//! spec.md §4.C.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use planforge_error::{PlanError, PlanResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
}

impl IntervalUnit {
    pub fn normalized_cron(self) -> &'static str {
        match self {
            IntervalUnit::Minute => "0 * * * * * *",
            IntervalUnit::Hour => "0 0 * * * * *",
            IntervalUnit::Day => "0 0 0 * * * *",
        }
    }
}

/// A parsed, schedulable cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    pub raw: String,
    pub interval_unit: IntervalUnit,
    pub normalized_cron: String,
    schedule: Schedule,
}

/// Expands common shorthand (`@daily`, `@hourly`, bare 5-field unix cron)
/// into the 7-field `sec min hour day month dow year` form the `cron`
/// crate expects.
fn to_seven_field(expr: &str) -> PlanResult<String> {
    let expr = expr.trim();
    let lowered = expr.to_ascii_lowercase();
    let expanded = match lowered.as_str() {
        "@yearly" | "@annually" => "0 0 0 1 1 * *".to_string(),
        "@monthly" => "0 0 0 1 * * *".to_string(),
        "@weekly" => "0 0 0 * * 1 *".to_string(),
        "@daily" | "@midnight" => "0 0 0 * * * *".to_string(),
        "@hourly" => "0 0 * * * * *".to_string(),
        _ => {
            let fields: Vec<&str> = expr.split_whitespace().collect();
            match fields.len() {
                7 => expr.to_string(),
                6 => format!("{expr} *"),
                5 => format!("0 {expr} *"),
                _ => {
                    return Err(PlanError::config(
                        "<cron>",
                        0,
                        format!("unsupported cron expression '{expr}'"),
                    ))
                }
            }
        }
    };
    Ok(expanded)
}

/// Midnight, 1970-01-01 — the anchor `infer_granularity` samples from
/// when a model declares no `start` (SPEC_FULL.md §4.C').
fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is representable")
}

impl CronSchedule {
    /// `start` anchors the ten-fire sample `infer_granularity` draws
    /// from — `start` itself when the model declares one, `epoch()`
    /// otherwise — so granularity inference is a pure function of the
    /// cron string and the model's own fields, never of wall-clock time
    /// (SPEC_FULL.md §4.C').
    pub fn parse(expr: &str, start: Option<DateTime<Utc>>) -> PlanResult<Self> {
        let seven_field = to_seven_field(expr)?;
        let schedule = Schedule::from_str(&seven_field).map_err(|e| {
            PlanError::config("<cron>", 0, format!("invalid cron expression '{expr}': {e}"))
        })?;

        let interval_unit = infer_granularity(&schedule, start.unwrap_or_else(epoch))?;

        Ok(CronSchedule {
            raw: expr.to_string(),
            interval_unit,
            normalized_cron: interval_unit.normalized_cron().to_string(),
            schedule,
        })
    }

    pub fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn prev(&self, before: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&(before - chrono::Duration::days(370)))
            .take_while(|t| *t < before)
            .last()
    }

    /// The most recent scheduled fire at or before `ts`.
    pub fn floor(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(next) = self.next(ts) {
            if next == ts {
                return Some(ts);
            }
        }
        self.prev(ts)
    }
}

/// Parses a model's `start` field (`%Y-%m-%d`) into the timestamp used
/// to anchor granularity inference. `None` for any other format or
/// macro expression `start` may hold — those resolve at render time,
/// not at parse time.
pub fn parse_start_date(start: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d")
        .ok()
        .map(|d| DateTime::from_naive_utc_and_offset(d.and_hms_opt(0, 0, 0).unwrap(), Utc))
}

/// Samples ten consecutive fires from `from` and infers the granularity
/// from the minimum gap between them, per spec.md §3.
fn infer_granularity(schedule: &Schedule, from: DateTime<Utc>) -> PlanResult<IntervalUnit> {
    let fires: Vec<DateTime<Utc>> = schedule.after(&from).take(10).collect();
    if fires.len() < 2 {
        return Ok(IntervalUnit::Day);
    }
    let min_gap = fires
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds())
        .min()
        .unwrap_or(86_400);

    Ok(if min_gap < 3600 {
        IntervalUnit::Minute
    } else if min_gap < 86_400 {
        IntervalUnit::Hour
    } else {
        IntervalUnit::Day
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_cron_has_day_granularity() {
        let s = CronSchedule::parse("@daily", None).unwrap();
        assert_eq!(s.interval_unit, IntervalUnit::Day);
        assert_eq!(s.normalized_cron, "0 0 0 * * * *");
    }

    #[test]
    fn daily_at_specific_hour_still_day_granularity() {
        // "@daily at 13:00" in spec prose maps to a concrete 5-field cron.
        let s = CronSchedule::parse("0 13 * * *", None).unwrap();
        assert_eq!(s.interval_unit, IntervalUnit::Day);
    }

    #[test]
    fn hourly_cron_has_hour_granularity() {
        let s = CronSchedule::parse("@hourly", None).unwrap();
        assert_eq!(s.interval_unit, IntervalUnit::Hour);
    }

    #[test]
    fn granularity_is_stable_regardless_of_start_anchor() {
        let at_epoch = CronSchedule::parse("@daily", None).unwrap();
        let at_2030 = CronSchedule::parse("@daily", parse_start_date("2030-06-15")).unwrap();
        assert_eq!(at_epoch.interval_unit, at_2030.interval_unit);
    }

    #[test]
    fn parse_start_date_rejects_non_date_strings() {
        assert!(parse_start_date("not-a-date").is_none());
        assert!(parse_start_date("2024-01-15").is_some());
    }
}
