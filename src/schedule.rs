//! Interval to recurring-trigger conversion.
//!
//! An "every N minutes" setting is stored as a six-field cron expression
//! (`sec min hour dom month dow`). Intervals of an hour or more are encoded as
//! "minute `N % 60` of every `N / 60`-th hour", so 90 minutes fires hourly at
//! :30 rather than every 90 minutes. Stored tasks depend on this encoding.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

const MINUTES_PER_DAY: i64 = 24 * 60;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid interval: {0} minutes")]
    InvalidInterval(i64),

    #[error("unrecognised schedule expression {0:?}")]
    Malformed(String),
}

/// Only built by [`interval_to_schedule`] or by parsing, which never yield a
/// zero minute step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSpec {
    hours: u32,
    minutes: u32,
}

impl CronSpec {
    /// Whether the trigger fires at `hour:minute:00`
    fn matches(&self, hour: u32, minute: u32) -> bool {
        if self.hours == 0 {
            minute.checked_rem(self.minutes) == Some(0)
        } else {
            minute == self.minutes && hour % self.hours == 0
        }
    }

    /// First fire time strictly after `after`. Every valid schedule fires at
    /// least once a day, so two days of candidates always suffice.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let first_minute = after.timestamp().div_euclid(60) + 1;

        (first_minute..first_minute + 2 * MINUTES_PER_DAY)
            .find(|minute| {
                let of_day = minute.rem_euclid(MINUTES_PER_DAY);
                self.matches((of_day / 60) as u32, (of_day % 60) as u32)
            })
            .and_then(|minute| DateTime::from_timestamp(minute * 60, 0))
    }
}

pub fn interval_to_schedule(total_minutes: i64) -> Result<CronSpec, ScheduleError> {
    if total_minutes <= 0 {
        return Err(ScheduleError::InvalidInterval(total_minutes));
    }
    let hours = u32::try_from(total_minutes / 60)
        .map_err(|_| ScheduleError::InvalidInterval(total_minutes))?;
    Ok(CronSpec {
        hours,
        minutes: (total_minutes % 60) as u32,
    })
}

impl fmt::Display for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hours == 0 {
            write!(f, "0 */{} * * * *", self.minutes)
        } else {
            write!(f, "0 {} */{} * * *", self.minutes, self.hours)
        }
    }
}

impl FromStr for CronSpec {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ScheduleError::Malformed(s.to_string());
        let step = |field: &str| field.strip_prefix("*/").and_then(|n| n.parse::<u32>().ok());

        let fields: Vec<&str> = s.split_whitespace().collect();
        let ["0", minute, hour, "*", "*", "*"] = fields.as_slice() else {
            return Err(malformed());
        };

        let spec = match (*hour, step(*minute)) {
            ("*", Some(minutes)) if (1..60).contains(&minutes) => CronSpec { hours: 0, minutes },
            (hour, None) => {
                let hours = step(hour).filter(|h| *h > 0).ok_or_else(malformed)?;
                let minutes = minute.parse::<u32>().ok().filter(|m| *m < 60).ok_or_else(malformed)?;
                CronSpec { hours, minutes }
            }
            _ => return Err(malformed()),
        };
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_non_positive_intervals_are_rejected() {
        for minutes in [0, -1, -60, i64::MIN] {
            assert_eq!(
                interval_to_schedule(minutes),
                Err(ScheduleError::InvalidInterval(minutes))
            );
        }
    }

    #[test]
    fn test_encoding() {
        assert_eq!(interval_to_schedule(30).unwrap().to_string(), "0 */30 * * * *");
        assert_eq!(interval_to_schedule(90).unwrap().to_string(), "0 30 */1 * * *");
        assert_eq!(interval_to_schedule(60).unwrap().to_string(), "0 0 */1 * * *");
        assert_eq!(interval_to_schedule(150).unwrap().to_string(), "0 30 */2 * * *");
    }

    #[test]
    fn test_round_trip() {
        for total in 1..=3000 {
            let spec = interval_to_schedule(total).unwrap();
            let decoded: CronSpec = spec.to_string().parse().unwrap();
            assert_eq!(decoded, spec);
            assert_eq!(
                (decoded.hours as i64, decoded.minutes as i64),
                (total / 60, total % 60)
            );
        }
    }

    #[test]
    fn test_decode_rejects_foreign_expressions() {
        for expr in [
            "",
            "* * * * *",
            "0 */0 * * * *",
            "0 */61 * * * *",
            "0 5 */0 * * *",
            "0 75 */1 * * *",
            "0 5 3 * * *",
        ] {
            assert!(expr.parse::<CronSpec>().is_err(), "{expr}");
        }
    }

    #[test]
    fn test_zero_minute_step_never_fires() {
        let degenerate = CronSpec {
            hours: 0,
            minutes: 0,
        };
        assert_eq!(degenerate.next_after(at(10, 0, 0)), None);
    }

    #[test]
    fn test_next_after_minute_steps() {
        let every_30 = interval_to_schedule(30).unwrap();
        assert_eq!(every_30.next_after(at(10, 0, 0)), Some(at(10, 30, 0)));
        assert_eq!(every_30.next_after(at(10, 29, 59)), Some(at(10, 30, 0)));
        assert_eq!(every_30.next_after(at(10, 45, 0)), Some(at(11, 0, 0)));

        // */7 restarts at the top of the hour
        let every_7 = interval_to_schedule(7).unwrap();
        assert_eq!(every_7.next_after(at(10, 57, 0)), Some(at(11, 0, 0)));
    }

    #[test]
    fn test_next_after_legacy_hourly_encoding() {
        let ninety = interval_to_schedule(90).unwrap();
        assert_eq!(ninety.next_after(at(10, 0, 0)), Some(at(10, 30, 0)));
        assert_eq!(ninety.next_after(at(10, 30, 0)), Some(at(11, 30, 0)));

        let every_5h = interval_to_schedule(300).unwrap();
        assert_eq!(
            every_5h.next_after(at(21, 0, 0)),
            Some(at(0, 0, 0) + chrono::Duration::days(1))
        );

        // Steps beyond a day only ever match hour 0
        let long = interval_to_schedule(48 * 60 + 15).unwrap();
        assert_eq!(
            long.next_after(at(0, 15, 0)),
            Some(at(0, 15, 0) + chrono::Duration::days(1))
        );
    }
}
