//! Schedule specifications for recurring tasks.

use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// When a recurring task should fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Every `minutes` minutes.
    Interval { minutes: u64 },
    /// Once every 24h at the given UTC wall-clock time.
    Daily { hour: u32, minute: u32 },
    /// Cron expression (minute/hour/day-of-week granularity).
    Cron { expression: String },
}

impl ScheduleSpec {
    /// Parse an interval argument: a token (`"hourly"`, `"daily"`) or minutes.
    pub fn interval(spec: &str) -> Result<Self, ScheduleError> {
        let minutes = match spec.trim().to_lowercase().as_str() {
            "hourly" => 60,
            "daily" => 24 * 60,
            other => other.parse::<u64>().map_err(|_| ScheduleError::InvalidSchedule {
                spec: spec.to_string(),
                reason: "expected 'hourly', 'daily', or a number of minutes".to_string(),
            })?,
        };
        if minutes == 0 {
            return Err(ScheduleError::InvalidSchedule {
                spec: spec.to_string(),
                reason: "interval must be at least one minute".to_string(),
            });
        }
        Ok(ScheduleSpec::Interval { minutes })
    }

    /// Parse a `"HH:MM"` daily wall-clock time.
    pub fn daily_at(time: &str) -> Result<Self, ScheduleError> {
        let parsed =
            NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|e| {
                ScheduleError::InvalidSchedule {
                    spec: time.to_string(),
                    reason: format!("expected HH:MM: {e}"),
                }
            })?;
        Ok(ScheduleSpec::Daily {
            hour: parsed.hour(),
            minute: parsed.minute(),
        })
    }

    /// Validate and normalize a cron expression.
    ///
    /// The `cron` crate wants a seconds field; classic 5-field expressions
    /// get `0 ` prepended so they fire at second zero.
    pub fn cron(expression: &str) -> Result<Self, ScheduleError> {
        let normalized = normalize_cron(expression);
        cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidSchedule {
            spec: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(ScheduleSpec::Cron {
            expression: normalized,
        })
    }

    /// Compute the next fire time strictly after `after`.
    ///
    /// `Ok(None)` means the schedule has no future firings.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match self {
            ScheduleSpec::Interval { minutes } => {
                Ok(Some(after + ChronoDuration::minutes(*minutes as i64)))
            }
            ScheduleSpec::Daily { hour, minute } => {
                let time = NaiveTime::from_hms_opt(*hour, *minute, 0).ok_or_else(|| {
                    ScheduleError::InvalidSchedule {
                        spec: format!("{hour:02}:{minute:02}"),
                        reason: "invalid wall-clock time".to_string(),
                    }
                })?;
                let today = after.date_naive().and_time(time);
                let today = DateTime::<Utc>::from_naive_utc_and_offset(today, Utc);
                if today > after {
                    Ok(Some(today))
                } else {
                    Ok(Some(today + ChronoDuration::days(1)))
                }
            }
            ScheduleSpec::Cron { expression } => {
                let schedule = cron::Schedule::from_str(expression).map_err(|e| {
                    ScheduleError::InvalidSchedule {
                        spec: expression.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(schedule.after(&after).next())
            }
        }
    }

    /// Human-readable description for listings.
    pub fn describe(&self) -> String {
        match self {
            ScheduleSpec::Interval { minutes } => format!("every {minutes}m"),
            ScheduleSpec::Daily { hour, minute } => format!("daily at {hour:02}:{minute:02}"),
            ScheduleSpec::Cron { expression } => format!("cron '{expression}'"),
        }
    }
}

/// Prepend a seconds field to classic 5-field cron expressions.
fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}
