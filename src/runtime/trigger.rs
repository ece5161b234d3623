//! Job triggers
//!
//! [`Interval`] fires on a fixed period measured from registration.
//! [`CronTrigger`] fires at wall-clock instants matching per-field
//! expressions, evaluated in a `chrono-tz` zone.
//!
//! Cron fields, most significant first: year, month, day, week, day_of_week,
//! hour, minute, second. Unset fields more significant than the least
//! significant set field match anything; less significant ones take their
//! minimum (so `hour = "3"` means 03:00:00 every day). `week` and
//! `day_of_week` always default to any. With no field set the trigger fires
//! every second.

use crate::error::SchedulerError;
use chrono::{DateTime, Datelike, Days, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on ISO weeks skipped per lookup; week 53 recurs within this
/// span in every zone
const MAX_WEEK_SKIPS: usize = 600;

/// Composable fixed period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interval {
    pub weeks: u64,
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl Interval {
    pub fn seconds(seconds: u64) -> Self {
        Self { seconds, ..Default::default() }
    }

    pub fn minutes(minutes: u64) -> Self {
        Self { minutes, ..Default::default() }
    }

    pub fn hours(hours: u64) -> Self {
        Self { hours, ..Default::default() }
    }

    pub fn days(days: u64) -> Self {
        Self { days, ..Default::default() }
    }

    pub fn weeks(weeks: u64) -> Self {
        Self { weeks, ..Default::default() }
    }

    /// Total period; zero is rejected
    pub fn period(&self) -> Result<Duration, SchedulerError> {
        let secs = self
            .weeks
            .checked_mul(7 * 24 * 3600)
            .and_then(|s| s.checked_add(self.days.checked_mul(24 * 3600)?))
            .and_then(|s| s.checked_add(self.hours.checked_mul(3600)?))
            .and_then(|s| s.checked_add(self.minutes.checked_mul(60)?))
            .and_then(|s| s.checked_add(self.seconds))
            .ok_or_else(|| SchedulerError::InvalidTrigger("interval overflows".to_string()))?;
        if secs == 0 {
            return Err(SchedulerError::InvalidTrigger("interval must be positive".to_string()));
        }
        Ok(Duration::from_secs(secs))
    }
}

/// Declarative cron trigger; every field takes `*`, `*/n`, `a`, `a-b` or a
/// comma separated list of those
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CronTrigger {
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
    /// ISO week number (1-53)
    pub week: Option<String>,
    /// `mon`..`sun` or 0 (Monday) to 6 (Sunday)
    pub day_of_week: Option<String>,
    pub hour: Option<String>,
    pub minute: Option<String>,
    pub second: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Defaults to UTC
    pub timezone: Option<Tz>,
}

impl CronTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn year(mut self, expr: impl Into<String>) -> Self {
        self.year = Some(expr.into());
        self
    }

    pub fn month(mut self, expr: impl Into<String>) -> Self {
        self.month = Some(expr.into());
        self
    }

    pub fn day(mut self, expr: impl Into<String>) -> Self {
        self.day = Some(expr.into());
        self
    }

    pub fn week(mut self, expr: impl Into<String>) -> Self {
        self.week = Some(expr.into());
        self
    }

    pub fn day_of_week(mut self, expr: impl Into<String>) -> Self {
        self.day_of_week = Some(expr.into());
        self
    }

    pub fn hour(mut self, expr: impl Into<String>) -> Self {
        self.hour = Some(expr.into());
        self
    }

    pub fn minute(mut self, expr: impl Into<String>) -> Self {
        self.minute = Some(expr.into());
        self
    }

    pub fn second(mut self, expr: impl Into<String>) -> Self {
        self.second = Some(expr.into());
        self
    }

    pub fn start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn timezone(mut self, tz: Tz) -> Self {
        self.timezone = Some(tz);
        self
    }

    /// Resolve defaults and parse every field
    pub fn compile(&self) -> Result<CompiledCron, SchedulerError> {
        // (value, minimum when defaulted); week and day_of_week never take a minimum
        let fields: [(&Option<String>, Option<&str>); 8] = [
            (&self.year, None),
            (&self.month, Some("1")),
            (&self.day, Some("1")),
            (&self.week, None),
            (&self.day_of_week, None),
            (&self.hour, Some("0")),
            (&self.minute, Some("0")),
            (&self.second, Some("0")),
        ];
        let last_set = fields.iter().rposition(|(value, _)| value.is_some());

        let resolved: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, (value, minimum))| match value {
                Some(expr) => expr.trim().to_string(),
                None => match (last_set, minimum) {
                    (Some(last), Some(min)) if i > last => min.to_string(),
                    _ => "*".to_string(),
                },
            })
            .collect();

        let [year, month, day, week, dow, hour, minute, second] = <[String; 8]>::try_from(resolved)
            .map_err(|_| SchedulerError::InvalidTrigger("cron field count".to_string()))?;

        let expression = format!(
            "{} {} {} {} {} {} {}",
            second,
            minute,
            hour,
            day,
            month,
            translate_day_of_week(&dow)?,
            year
        );
        let schedule = cron::Schedule::from_str(&expression)
            .map_err(|e| SchedulerError::InvalidTrigger(format!("'{}': {}", expression, e)))?;
        let weeks = if week == "*" {
            None
        } else {
            Some(WeekFilter::parse(&week)?)
        };

        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end < start {
                return Err(SchedulerError::InvalidTrigger("end precedes start".to_string()));
            }
        }

        Ok(CompiledCron {
            schedule,
            expression,
            weeks,
            timezone: self.timezone.unwrap_or(Tz::UTC),
            start: self.start,
            end: self.end,
        })
    }
}

/// Parsed cron trigger, ready to compute fire times
#[derive(Debug, Clone)]
pub struct CompiledCron {
    schedule: cron::Schedule,
    expression: String,
    weeks: Option<WeekFilter>,
    timezone: Tz,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl CompiledCron {
    /// Seven-field expression handed to the `cron` crate
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`, bounded by start/end
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = match self.start {
            Some(start) if start > after => start - chrono::Duration::seconds(1),
            _ => after,
        };
        let mut local = from.with_timezone(&self.timezone);
        for _ in 0..=MAX_WEEK_SKIPS {
            let candidate = self.schedule.after(&local).next()?;
            let at = candidate.with_timezone(&Utc);
            if let Some(end) = self.end {
                if at > end {
                    return None;
                }
            }
            match &self.weeks {
                Some(filter) if !filter.matches(candidate.iso_week().week()) => {
                    // resume just before Monday 00:00 of the following ISO week
                    local = self.next_week_start(&candidate)? - chrono::Duration::seconds(1);
                }
                _ => return Some(at),
            }
        }
        None
    }

    fn next_week_start(&self, at: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let date = at.date_naive();
        let monday = date.checked_add_days(Days::new(7 - u64::from(date.weekday().num_days_from_monday())))?;
        let midnight = monday.and_hms_opt(0, 0, 0)?;
        // a DST gap at midnight moves the week start to the first valid hour
        self.timezone
            .from_local_datetime(&midnight)
            .earliest()
            .or_else(|| {
                self.timezone
                    .from_local_datetime(&(midnight + chrono::Duration::hours(1)))
                    .earliest()
            })
    }
}

/// Job trigger
#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Cron(Box<CompiledCron>),
}

impl Trigger {
    pub fn describe(&self) -> String {
        match self {
            Trigger::Interval(period) => format!("every {:?}", period),
            Trigger::Cron(cron) => format!("cron '{}'", cron.expression()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct WeekRange {
    low: u32,
    high: u32,
    step: u32,
}

/// ISO week number filter
#[derive(Debug, Clone, PartialEq)]
struct WeekFilter {
    ranges: Vec<WeekRange>,
}

impl WeekFilter {
    fn parse(expr: &str) -> Result<Self, SchedulerError> {
        let invalid = || SchedulerError::InvalidTrigger(format!("invalid week expression '{}'", expr));
        let number = |s: &str| -> Result<u32, SchedulerError> {
            let n: u32 = s.trim().parse().map_err(|_| invalid())?;
            if (1..=53).contains(&n) {
                Ok(n)
            } else {
                Err(invalid())
            }
        };

        let mut ranges = Vec::new();
        for part in expr.split(',') {
            let (body, step) = match part.split_once('/') {
                Some((body, step)) => (body, step.trim().parse::<u32>().map_err(|_| invalid())?),
                None => (part, 1),
            };
            if step == 0 {
                return Err(invalid());
            }
            let (low, high) = match body.trim() {
                "*" => (1, 53),
                range if range.contains('-') => {
                    let (a, b) = range.split_once('-').ok_or_else(invalid)?;
                    (number(a)?, number(b)?)
                }
                single if step > 1 => (number(single)?, 53),
                single => {
                    let n = number(single)?;
                    (n, n)
                }
            };
            if low > high {
                return Err(invalid());
            }
            ranges.push(WeekRange { low, high, step });
        }
        Ok(Self { ranges })
    }

    fn matches(&self, week: u32) -> bool {
        self.ranges
            .iter()
            .any(|r| week >= r.low && week <= r.high && (week - r.low) % r.step == 0)
    }
}

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn day_index(atom: &str) -> Result<usize, SchedulerError> {
    let atom = atom.trim();
    if let Ok(n) = atom.parse::<usize>() {
        if n < DAY_NAMES.len() {
            return Ok(n);
        }
        return Err(SchedulerError::InvalidTrigger(format!("day_of_week out of range: {}", atom)));
    }
    atom.get(..3)
        .and_then(|prefix| DAY_NAMES.iter().position(|d| d.eq_ignore_ascii_case(prefix)))
        .ok_or_else(|| SchedulerError::InvalidTrigger(format!("unknown day_of_week '{}'", atom)))
}

/// Rewrite a Monday-based day_of_week expression as an explicit list of day
/// names. The `cron` crate numbers days from Sunday, so ranges are expanded
/// rather than passed through.
fn translate_day_of_week(expr: &str) -> Result<String, SchedulerError> {
    if expr == "*" {
        return Ok(expr.to_string());
    }
    let mut days = Vec::new();
    for part in expr.split(',') {
        let (body, step) = match part.split_once('/') {
            Some((body, step)) => {
                let step: usize = step
                    .trim()
                    .parse()
                    .map_err(|_| SchedulerError::InvalidTrigger(format!("invalid step in '{}'", part)))?;
                (body.trim(), step)
            }
            None => (part.trim(), 1),
        };
        if step == 0 {
            return Err(SchedulerError::InvalidTrigger(format!("invalid step in '{}'", part)));
        }
        let (low, high) = match body {
            "*" => (0, DAY_NAMES.len() - 1),
            range if range.contains('-') => {
                let (a, b) = range
                    .split_once('-')
                    .ok_or_else(|| SchedulerError::InvalidTrigger(format!("invalid range '{}'", range)))?;
                (day_index(a)?, day_index(b)?)
            }
            single if step > 1 => (day_index(single)?, DAY_NAMES.len() - 1),
            single => {
                let n = day_index(single)?;
                (n, n)
            }
        };
        if low > high {
            return Err(SchedulerError::InvalidTrigger(format!("invalid range '{}'", body)));
        }
        for day in (low..=high).step_by(step) {
            if !days.contains(&day) {
                days.push(day);
            }
        }
    }
    days.sort_unstable();
    Ok(days.iter().map(|d| DAY_NAMES[*d]).collect::<Vec<_>>().join(","))
}
