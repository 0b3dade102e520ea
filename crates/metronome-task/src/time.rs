use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime, NaiveTime};

use crate::error::{Result, ScheduleError};

/// Wall-clock time of day, parsed from `"H"` or `"H:M"` in 24-hour form.
///
/// Components are plain integers with no leading-zero requirement: `"5:15"`,
/// `"05:15"` and `"5:5"` all parse. Out-of-range components are rejected
/// here rather than at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidTimeFormat {
                input: format!("{hour}:{minute}"),
            });
        }
        Ok(Self { hour, minute })
    }

    /// Parse `"H"` or `"H:M"`. A missing minute component defaults to `0`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || ScheduleError::InvalidTimeFormat {
            input: input.to_string(),
        };
        let mut segments = input.split(':');
        let hour = segments
            .next()
            .and_then(|h| h.trim().parse::<u8>().ok())
            .ok_or_else(invalid)?;
        let minute = match segments.next() {
            Some(m) => m.trim().parse::<u8>().map_err(|_| invalid())?,
            None => 0,
        };
        if segments.next().is_some() {
            return Err(invalid());
        }
        Self::new(hour, minute).map_err(|_| invalid())
    }

    pub(crate) fn as_naive(&self) -> NaiveTime {
        // Components are range-checked on construction.
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0)
            .expect("range-checked time of day")
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Is `now` inside the daily window `[start, end)`?
///
/// When `end` is earlier than `start` the window crosses midnight. The window
/// is then anchored so `now` can fall inside it: a start still in the future
/// belongs to yesterday's window, otherwise the end belongs to tomorrow. This
/// makes a window like 22:00-02:00 hold at 23:30 and at 01:00 on any date.
pub(crate) fn in_window(now: NaiveDateTime, start: TimeOfDay, end: TimeOfDay) -> bool {
    let date = now.date();
    let mut start_at = date.and_time(start.as_naive());
    let mut end_at = date.and_time(end.as_naive());

    if end < start {
        if start_at > now {
            start_at -= Duration::days(1);
        } else {
            end_at += Duration::days(1);
        }
    }

    start_at <= now && now < end_at
}
