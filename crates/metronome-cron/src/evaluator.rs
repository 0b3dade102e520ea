use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike,
};
use tracing::debug;

use crate::error::{CronError, Result};
use crate::expression::CronExpression;
use crate::field::{self, FieldSet};

/// How far ahead [`CompiledExpression::next_after`] searches before giving up.
/// Five years covers every real calendar pattern; anything still unmatched
/// (for example day 30 of February) has no upcoming occurrence at all.
pub const SEARCH_HORIZON_DAYS: i64 = 365 * 5 + 2;

/// A cron expression expanded into per-field value sets, ready for matching.
///
/// Matching is done on local wall-clock components: callers convert "now" to
/// the schedule's timezone first and hand over the naive local time.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
}

impl CronExpression {
    /// Expand all five fields into value sets.
    ///
    /// This is where field syntax and value bounds are enforced; a malformed
    /// field fails with [`CronError::InvalidExpression`] naming the field.
    pub fn compile(&self) -> Result<CompiledExpression> {
        let [minute, hour, day_of_month, month, day_of_week] = self.raw_fields();
        Ok(CompiledExpression {
            source: self.to_string(),
            minute: FieldSet::parse(minute, field::MINUTE)?,
            hour: FieldSet::parse(hour, field::HOUR)?,
            day_of_month: FieldSet::parse(day_of_month, field::DAY_OF_MONTH)?,
            month: FieldSet::parse(month, field::MONTH)?,
            day_of_week: FieldSet::parse(day_of_week, field::DAY_OF_WEEK)?,
        })
    }

    /// Compile and match in one call: is the expression due at `now`?
    pub fn is_due<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Result<bool> {
        Ok(self.compile()?.matches(now.naive_local()))
    }

    /// Compile and search in one call: the next matching instant after `from`.
    pub fn next_run<Tz: TimeZone>(&self, from: DateTime<Tz>) -> Result<DateTime<Tz>> {
        self.compile()?.next_after(from)
    }
}

impl CompiledExpression {
    /// True when the wall-clock minute of `at` satisfies every field.
    /// Seconds and finer are ignored: cron has minute resolution.
    pub fn matches(&self, at: NaiveDateTime) -> bool {
        self.minute.matches(at.minute() as u8)
            && self.hour.matches(at.hour() as u8)
            && self.month.matches(at.month() as u8)
            && self.day_matches(at.date())
    }

    /// Smallest instant strictly after `from` whose local wall-clock matches.
    ///
    /// The candidate advances unit-by-unit: a wrong month jumps to the first
    /// of the next month, a wrong day to the next midnight, wrong hours and
    /// minutes to the next allowed value, so the search never crawls
    /// minute-by-minute across days. Bounded by [`SEARCH_HORIZON_DAYS`].
    ///
    /// Local times swallowed by a daylight-saving gap are skipped; ambiguous
    /// local times (clocks rolled back) resolve to the earlier instant.
    pub fn next_after<Tz: TimeZone>(&self, from: DateTime<Tz>) -> Result<DateTime<Tz>> {
        let tz = from.timezone();
        let local = from.naive_local();
        let mut cursor =
            clock(local.date(), local.hour() as u8, local.minute() as u8) + Duration::minutes(1);
        let horizon = cursor + Duration::days(SEARCH_HORIZON_DAYS);

        loop {
            if cursor >= horizon {
                return Err(self.no_match());
            }

            if !self.month.matches(cursor.month() as u8) {
                cursor = match start_of_next_month(cursor.date()) {
                    Some(next) => next,
                    None => return Err(self.no_match()),
                };
                continue;
            }

            if !self.day_matches(cursor.date()) {
                cursor = match cursor.date().succ_opt() {
                    Some(next) => next.and_time(NaiveTime::MIN),
                    None => return Err(self.no_match()),
                };
                continue;
            }

            if !self.hour.matches(cursor.hour() as u8) {
                cursor = match self.hour.next_at_or_after(cursor.hour() as u8) {
                    Some(h) => clock(cursor.date(), h, 0),
                    None => match cursor.date().succ_opt() {
                        Some(next) => next.and_time(NaiveTime::MIN),
                        None => return Err(self.no_match()),
                    },
                };
                continue;
            }

            if !self.minute.matches(cursor.minute() as u8) {
                cursor = match self.minute.next_at_or_after(cursor.minute() as u8) {
                    Some(m) => clock(cursor.date(), cursor.hour() as u8, m),
                    None => clock(cursor.date(), cursor.hour() as u8, 0) + Duration::hours(1),
                };
                continue;
            }

            match tz.from_local_datetime(&cursor) {
                LocalResult::Single(resolved) => return Ok(resolved),
                LocalResult::Ambiguous(earliest, _) => return Ok(earliest),
                LocalResult::None => {
                    debug!(candidate = %cursor, "local time does not exist (DST gap), continuing");
                    cursor += Duration::minutes(1);
                }
            }
        }
    }

    /// Day matching follows the standard cron rule: when both day-of-month
    /// and day-of-week are restricted, a date qualifies if either side
    /// matches; otherwise the restricted side (if any) decides alone.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.day_of_month.matches(date.day() as u8);
        let dow = self
            .day_of_week
            .matches(date.weekday().num_days_from_sunday() as u8);
        match (
            self.day_of_month.is_restricted(),
            self.day_of_week.is_restricted(),
        ) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    fn no_match(&self) -> CronError {
        CronError::NoUpcomingMatch {
            expression: self.source.clone(),
        }
    }
}

fn clock(date: NaiveDate, hour: u8, minute: u8) -> NaiveDateTime {
    // Hour and minute always come from bounds-checked field sets or a valid
    // DateTime, so the conversion cannot fail.
    NaiveDateTime::new(
        date,
        NaiveTime::from_hms_opt(hour as u32, minute as u32, 0).expect("validated clock value"),
    )
}

fn start_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).map(|d| d.and_time(NaiveTime::MIN))
}
