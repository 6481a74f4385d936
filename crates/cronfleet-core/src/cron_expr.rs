//! Cron expression parsing and next-fire evaluation.
//!
//! Accepts standard five-field expressions (`minute hour day month weekday`)
//! and six-field expressions with a leading seconds field. Numeric weekdays
//! follow crontab numbering in both forms: `0` and `7` are Sunday, `1` is
//! Monday. When both day-of-month and day-of-week are restricted, a day
//! matching either one fires, as in crontab. Evaluation is always in UTC.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("cron expression \"{expression}\" has {count} fields; expected 5 or 6")]
    FieldCount { expression: String, count: usize },

    #[error("invalid cron expression \"{expression}\": {reason}")]
    Invalid { expression: String, reason: String },
}

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    /// One schedule normally; two when day-of-month and day-of-week are
    /// both restricted, one per day field. A fire of either counts.
    schedules: Vec<cron::Schedule>,
}

impl CronSchedule {
    /// Parse a five- or six-field cron expression, or an `@hourly`-style macro.
    ///
    /// # Errors
    ///
    /// Returns [`CronError`] if the field count is wrong or any field is invalid.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        let normalized = if trimmed.starts_with('@') {
            vec![trimmed.to_string()]
        } else {
            normalize_fields(trimmed)?
        };

        let schedules = normalized
            .iter()
            .map(|expr| {
                cron::Schedule::from_str(expr).map_err(|e| CronError::Invalid {
                    expression: trimmed.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedules,
        })
    }

    /// The expression as originally written (trimmed).
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The earliest fire instant strictly after `after`.
    ///
    /// Returns `None` if the schedule never fires again.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
    }

    /// The next `count` fire instants strictly after `after`.
    #[must_use]
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        while times.len() < count {
            let Some(next) = self.next_after(cursor) else {
                break;
            };
            times.push(next);
            cursor = next;
        }
        times
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Rewrite a five- or six-field expression into the seconds-first form the
/// `cron` crate expects, translating numeric weekdays to names.
///
/// Returns two expressions when both day fields are restricted: one keeping
/// only the day-of-month, one keeping only the day-of-week.
fn normalize_fields(expression: &str) -> Result<Vec<String>, CronError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let (seconds, rest) = match fields.len() {
        5 => ("0", &fields[..]),
        6 => (fields[0], &fields[1..]),
        count => {
            return Err(CronError::FieldCount {
                expression: expression.to_string(),
                count,
            })
        }
    };

    let weekday = normalize_weekday(rest[4]).map_err(|reason| CronError::Invalid {
        expression: expression.to_string(),
        reason,
    })?;
    let (minute, hour, day, month) = (rest[0], rest[1], rest[2], rest[3]);

    if is_restricted(day) && is_restricted(&weekday) {
        return Ok(vec![
            format!("{seconds} {minute} {hour} {day} {month} *"),
            format!("{seconds} {minute} {hour} * {month} {weekday}"),
        ]);
    }
    Ok(vec![format!(
        "{seconds} {minute} {hour} {day} {month} {weekday}"
    )])
}

fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// Translate crontab weekday numbers (0-7, Sunday = 0 or 7) into names.
///
/// Numeric ranges and steps are expanded into an explicit list so that
/// wrap-around values like `5-7` stay valid. Named tokens pass through.
fn normalize_weekday(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days: Vec<String> = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<usize>()
                    .map_err(|_| format!("invalid weekday step \"{step}\""))?;
                if step == 0 {
                    return Err("weekday step must be greater than zero".to_string());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let Some((start, end)) = numeric_bounds(range, step.is_some())? else {
            days.push(part.to_string());
            continue;
        };

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            let name = WEEKDAY_NAMES[day % 7].to_string();
            if !days.contains(&name) {
                days.push(name);
            }
        }
    }

    Ok(days.join(","))
}

/// Bounds of a numeric weekday range, or `None` if the token is not numeric.
fn numeric_bounds(range: &str, stepped: bool) -> Result<Option<(usize, usize)>, String> {
    let parse_day = |raw: &str| -> Result<Option<usize>, String> {
        match raw.parse::<usize>() {
            Ok(day) if day <= 7 => Ok(Some(day)),
            Ok(day) => Err(format!("weekday {day} is out of range 0-7")),
            Err(_) => Ok(None),
        }
    };

    if range == "*" {
        return Ok(Some((0, 6)));
    }

    if let Some((start, end)) = range.split_once('-') {
        return match (parse_day(start)?, parse_day(end)?) {
            (Some(start), Some(end)) if start <= end => Ok(Some((start, end))),
            (Some(start), Some(end)) => Err(format!("weekday range {start}-{end} is reversed")),
            _ => Ok(None),
        };
    }

    // A bare `n/step` means "from n through the end of the week".
    Ok(parse_day(range)?.map(|day| if stepped { (day, 6) } else { (day, day) }))
}
