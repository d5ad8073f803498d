//! Cron-like trigger schedules.
//!
//! Expressions use the classic five fields (minute, hour, day-of-month,
//! month, day-of-week, with day-of-week `0` or `7` meaning Sunday). They are
//! normalized to the seconds-first form the `cron` crate evaluates.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed five-field cron expression evaluated in a fixed timezone.
///
/// When both day-of-month and day-of-week are restricted, an instant fires
/// if it matches either field, as in classic cron.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    timezone: Tz,
    schedule: Schedule,
    /// Day-of-week half of an either-day expression.
    weekday_schedule: Option<Schedule>,
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression && self.timezone == other.timezone
    }
}

impl CronSchedule {
    /// Parses a five-field expression such as `"0 2 * * *"`, evaluated in UTC.
    ///
    /// # Errors
    ///
    /// Returns a [`ScheduleError`] if the expression does not have exactly
    /// five fields or a field is out of range.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::new(
                expression,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }

        let day_of_month = fields[2];
        let day_of_week = normalize_day_of_week(expression, fields[4])?;
        let build = |day_of_month: &str, day_of_week: &str| {
            let normalized = format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], day_of_month, fields[3], day_of_week
            );
            Schedule::from_str(&normalized)
                .map_err(|e| ScheduleError::new(expression, e.to_string()))
        };

        let (schedule, weekday_schedule) =
            if is_restricted(day_of_month) && is_restricted(&day_of_week) {
                (build(day_of_month, "*")?, Some(build("*", &day_of_week)?))
            } else {
                (build(day_of_month, &day_of_week)?, None)
            };

        Ok(Self {
            expression: fields.join(" "),
            timezone: Tz::UTC,
            schedule,
            weekday_schedule,
        })
    }

    /// Evaluates the schedule in `timezone` instead of UTC.
    #[must_use]
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Parses an IANA timezone name such as `"Europe/Berlin"`.
    ///
    /// # Errors
    ///
    /// Returns a [`ScheduleError`] naming the rejected timezone.
    pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
        name.parse::<Tz>()
            .map_err(|_| ScheduleError::new(name, "unknown timezone"))
    }

    /// Returns the five-field expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the evaluation timezone.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Returns the first occurrence strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone);
        let by_day = self.schedule.after(&local).next();
        let by_weekday = self
            .weekday_schedule
            .as_ref()
            .and_then(|schedule| schedule.after(&local).next());

        by_day
            .into_iter()
            .chain(by_weekday)
            .min()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Returns up to `count` occurrences strictly after `after`.
    #[must_use]
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut fires = Vec::with_capacity(count);
        let mut cursor = after;
        while fires.len() < count {
            let Some(next) = self.next_after(cursor) else {
                break;
            };
            fires.push(next);
            cursor = next;
        }
        fires
    }
}

fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// Rewrites a numeric day-of-week field as day names.
///
/// The `cron` crate numbers days 1-7 starting at Sunday; named days avoid the
/// off-by-one. Fields that already use names pass through unchanged.
fn normalize_day_of_week(expression: &str, field: &str) -> Result<String, ScheduleError> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let invalid = |reason: &str| ScheduleError::new(expression, format!("day-of-week: {reason}"));
    let parse_day = |token: &str| -> Result<usize, ScheduleError> {
        match token.parse::<usize>() {
            Ok(day @ 0..=7) => Ok(day % 7),
            _ => Err(invalid(&format!("'{token}' is not in 0-7"))),
        }
    };

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| invalid(&format!("invalid step '{step}'")))?;
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            // 7 is Sunday closing the week, as in "5-7". The only range it
            // may start is "7-7".
            let b = match b.parse::<usize>() {
                Ok(day @ 0..=7) => day,
                _ => return Err(invalid(&format!("invalid range '{range}'"))),
            };
            let a = match a.parse::<usize>() {
                Ok(7) => 7,
                _ => parse_day(a)?,
            };
            if a > b {
                return Err(invalid(&format!("descending range '{range}'")));
            }
            (a, b)
        } else {
            let day = parse_day(range)?;
            (day, if step.is_some() { 6 } else { day })
        };

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days.insert(day % 7);
        }
    }

    if days.len() == 7 {
        return Ok("*".to_string());
    }
    Ok(days
        .into_iter()
        .map(|d| DAY_NAMES[d])
        .collect::<Vec<_>>()
        .join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_daily_schedule_next_fire() {
        let schedule = CronSchedule::parse("0 2 * * *").unwrap();

        assert_eq!(
            schedule.next_after(utc(2024, 3, 1, 1, 59)),
            Some(utc(2024, 3, 1, 2, 0))
        );
        // Strictly after: the current occurrence is not returned again.
        assert_eq!(
            schedule.next_after(utc(2024, 3, 1, 2, 0)),
            Some(utc(2024, 3, 2, 2, 0))
        );
    }

    #[test]
    fn test_midnight_schedule() {
        let schedule = CronSchedule::parse("0 0 * * *").unwrap();
        let next = schedule.next_after(utc(2024, 12, 31, 23, 30)).unwrap();
        assert_eq!(next, utc(2025, 1, 1, 0, 0));
    }

    #[test]
    fn test_numeric_day_of_week_uses_sunday_zero() {
        let schedule = CronSchedule::parse("30 6 * * 1-5").unwrap();
        // 2024-03-02 is a Saturday.
        let next = schedule.next_after(utc(2024, 3, 2, 0, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (6, 30));

        let sunday = CronSchedule::parse("0 12 * * 0").unwrap();
        assert_eq!(
            sunday.next_after(utc(2024, 3, 1, 0, 0)).unwrap().weekday(),
            Weekday::Sun
        );
        let also_sunday = CronSchedule::parse("0 12 * * 7").unwrap();
        assert_eq!(
            also_sunday.next_after(utc(2024, 3, 1, 0, 0)),
            sunday.next_after(utc(2024, 3, 1, 0, 0))
        );
    }

    #[test]
    fn test_day_of_week_normalization() {
        assert_eq!(normalize_day_of_week("e", "1-5").unwrap(), "MON,TUE,WED,THU,FRI");
        assert_eq!(normalize_day_of_week("e", "5-7").unwrap(), "SUN,FRI,SAT");
        assert_eq!(normalize_day_of_week("e", "*/2").unwrap(), "SUN,TUE,THU,SAT");
        assert_eq!(normalize_day_of_week("e", "0,3").unwrap(), "SUN,WED");
        assert_eq!(normalize_day_of_week("e", "0-6").unwrap(), "*");
        assert_eq!(normalize_day_of_week("e", "MON-FRI").unwrap(), "MON-FRI");
        assert_eq!(normalize_day_of_week("e", "7-7").unwrap(), "SUN");
        assert_eq!(normalize_day_of_week("e", "0-7").unwrap(), "*");
        assert!(normalize_day_of_week("e", "8").is_err());
        assert!(normalize_day_of_week("e", "5-2").is_err());
        assert!(normalize_day_of_week("e", "7-5").is_err());
    }

    #[test]
    fn test_sunday_only_range_starting_at_seven() {
        let schedule = CronSchedule::parse("0 12 * * 7-7").unwrap();
        let fires = schedule.upcoming(utc(2024, 3, 1, 0, 0), 7);

        assert_eq!(fires.len(), 7);
        assert!(fires.iter().all(|t| t.weekday() == Weekday::Sun));
        assert_eq!(fires[0], utc(2024, 3, 3, 12, 0));
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // The 13th of each month, and every Friday.
        let schedule = CronSchedule::parse("0 0 13 * 5").unwrap();
        let fires = schedule.upcoming(utc(2024, 9, 1, 0, 0), 7);

        assert_eq!(
            fires,
            vec![
                utc(2024, 9, 6, 0, 0),
                utc(2024, 9, 13, 0, 0),
                utc(2024, 9, 20, 0, 0),
                utc(2024, 9, 27, 0, 0),
                utc(2024, 10, 4, 0, 0),
                utc(2024, 10, 11, 0, 0),
                utc(2024, 10, 13, 0, 0),
            ]
        );

        // An unrestricted day-of-week keeps plain day-of-month matching.
        let monthly = CronSchedule::parse("0 0 13 * 0-6").unwrap();
        assert_eq!(
            monthly.upcoming(utc(2024, 9, 1, 0, 0), 2),
            vec![utc(2024, 9, 13, 0, 0), utc(2024, 10, 13, 0, 0)]
        );
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        let err = CronSchedule::parse("0 0 *").unwrap_err();
        assert!(err.reason.contains("expected 5 fields"));

        assert!(CronSchedule::parse("0 0 0 * * *").is_err());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(CronSchedule::parse("61 0 * * *").is_err());
        assert!(CronSchedule::parse("0 25 * * *").is_err());
    }

    #[test]
    fn test_timezone_shifts_fire_time() {
        let tz = CronSchedule::parse_timezone("Europe/Berlin").unwrap();
        let schedule = CronSchedule::parse("0 2 * * *").unwrap().with_timezone(tz);

        // 02:00 in Berlin during winter time is 01:00 UTC.
        assert_eq!(
            schedule.next_after(utc(2024, 1, 10, 0, 0)),
            Some(utc(2024, 1, 10, 1, 0))
        );
        assert!(CronSchedule::parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_upcoming() {
        let schedule = CronSchedule::parse("0 1 * * *").unwrap();
        let fires = schedule.upcoming(utc(2024, 3, 1, 0, 0), 3);
        assert_eq!(
            fires,
            vec![utc(2024, 3, 1, 1, 0), utc(2024, 3, 2, 1, 0), utc(2024, 3, 3, 1, 0)]
        );
    }
}
