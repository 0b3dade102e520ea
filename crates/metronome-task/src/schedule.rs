use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use metronome_cron::CronExpression;

use crate::error::{Result, ScheduleError};
use crate::filter::{FilterChain, FilterContext};
use crate::time::{in_window, TimeOfDay};

/// Default mutex lease in minutes: one day.
pub const DEFAULT_LEASE_MINUTES: u64 = 1440;

/// Declarative half of a task registration: when it fires and under which
/// execution policy.
///
/// Built fluently. Every combinator edits one or more positions of the
/// five-field expression and leaves the rest at their current value, so
/// combinators touching disjoint positions compose in any order and a later
/// edit to the same position wins. Combinators that parse caller input
/// (times of day, timezones, raw expressions) are fallible and fail fast;
/// the fixed presets cannot fail.
#[derive(Debug)]
pub struct Schedule {
    expression: CronExpression,
    timezone: Option<Tz>,
    filters: FilterChain,
    prevent_overlap: bool,
    lease_minutes: u64,
    single_server: bool,
    payload: Value,
}

impl Schedule {
    pub fn new() -> Self {
        Self {
            expression: CronExpression::every_minute(),
            timezone: None,
            filters: FilterChain::new(),
            prevent_overlap: false,
            lease_minutes: DEFAULT_LEASE_MINUTES,
            single_server: false,
            payload: Value::Null,
        }
    }

    // --- raw expression access ----------------------------------------------

    /// Replace the whole expression with a caller-supplied cron string.
    pub fn cron(mut self, expression: &str) -> Result<Self> {
        self.expression = CronExpression::parse(expression)?;
        Ok(self)
    }

    /// Replace a single field (1-indexed position) of the expression.
    pub fn with_field(mut self, position: u8, value: impl Into<String>) -> Result<Self> {
        self.expression = self.expression.with_field(position, value)?;
        Ok(self)
    }

    pub fn expression(&self) -> &CronExpression {
        &self.expression
    }

    // --- minute presets -------------------------------------------------------

    pub fn every_minute(self) -> Self {
        self.spliced(CronExpression::MINUTE, "*")
    }

    pub fn every_two_minutes(self) -> Self {
        self.spliced(CronExpression::MINUTE, "*/2")
    }

    pub fn every_three_minutes(self) -> Self {
        self.spliced(CronExpression::MINUTE, "*/3")
    }

    pub fn every_four_minutes(self) -> Self {
        self.spliced(CronExpression::MINUTE, "*/4")
    }

    pub fn every_five_minutes(self) -> Self {
        self.spliced(CronExpression::MINUTE, "*/5")
    }

    pub fn every_ten_minutes(self) -> Self {
        self.spliced(CronExpression::MINUTE, "*/10")
    }

    pub fn every_fifteen_minutes(self) -> Self {
        self.spliced(CronExpression::MINUTE, "*/15")
    }

    pub fn every_thirty_minutes(self) -> Self {
        self.spliced(CronExpression::MINUTE, "0,30")
    }

    // --- hour presets ---------------------------------------------------------

    pub fn hourly(self) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
    }

    /// Run every hour at the given minute offset.
    pub fn hourly_at(self, minute: u8) -> Self {
        self.spliced(CronExpression::MINUTE, minute)
    }

    pub fn every_two_hours(self) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
            .spliced(CronExpression::HOUR, "*/2")
    }

    pub fn every_three_hours(self) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
            .spliced(CronExpression::HOUR, "*/3")
    }

    pub fn every_four_hours(self) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
            .spliced(CronExpression::HOUR, "*/4")
    }

    pub fn every_six_hours(self) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
            .spliced(CronExpression::HOUR, "*/6")
    }

    // --- day presets ------------------------------------------------------

    pub fn daily(self) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
            .spliced(CronExpression::HOUR, 0)
    }

    /// Alias for [`daily_at`](Self::daily_at).
    pub fn at(self, time: &str) -> Result<Self> {
        self.daily_at(time)
    }

    /// Run every day at the given `"H"` or `"H:M"` time.
    pub fn daily_at(self, time: &str) -> Result<Self> {
        let time = TimeOfDay::parse(time)?;
        Ok(self
            .spliced(CronExpression::HOUR, time.hour)
            .spliced(CronExpression::MINUTE, time.minute))
    }

    /// Run every day at two fixed hours, on the hour.
    pub fn twice_daily(self, first: u8, second: u8) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
            .spliced(CronExpression::HOUR, format!("{first},{second}"))
    }

    // --- day-of-week presets -----------------------------------------------

    /// Constrain to the given weekdays (0 = Sunday .. 6 = Saturday).
    pub fn days(self, days: impl IntoIterator<Item = u8>) -> Result<Self> {
        let list = days
            .into_iter()
            .map(|day| day.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.with_field(CronExpression::DAY_OF_WEEK, list)
    }

    pub fn weekdays(self) -> Self {
        self.spliced(CronExpression::DAY_OF_WEEK, "1-5")
    }

    pub fn weekends(self) -> Self {
        self.spliced(CronExpression::DAY_OF_WEEK, "0,6")
    }

    pub fn sundays(self) -> Self {
        self.spliced(CronExpression::DAY_OF_WEEK, 0)
    }

    pub fn mondays(self) -> Self {
        self.spliced(CronExpression::DAY_OF_WEEK, 1)
    }

    pub fn tuesdays(self) -> Self {
        self.spliced(CronExpression::DAY_OF_WEEK, 2)
    }

    pub fn wednesdays(self) -> Self {
        self.spliced(CronExpression::DAY_OF_WEEK, 3)
    }

    pub fn thursdays(self) -> Self {
        self.spliced(CronExpression::DAY_OF_WEEK, 4)
    }

    pub fn fridays(self) -> Self {
        self.spliced(CronExpression::DAY_OF_WEEK, 5)
    }

    pub fn saturdays(self) -> Self {
        self.spliced(CronExpression::DAY_OF_WEEK, 6)
    }

    // --- week, month and year presets --------------------------------------

    /// Sunday at midnight.
    pub fn weekly(self) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
            .spliced(CronExpression::HOUR, 0)
            .spliced(CronExpression::DAY_OF_WEEK, 0)
    }

    pub fn weekly_on(self, day: u8, time: &str) -> Result<Self> {
        Ok(self
            .daily_at(time)?
            .spliced(CronExpression::DAY_OF_WEEK, day))
    }

    /// First of the month at midnight.
    pub fn monthly(self) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
            .spliced(CronExpression::HOUR, 0)
            .spliced(CronExpression::DAY_OF_MONTH, 1)
    }

    pub fn monthly_on(self, day: u8, time: &str) -> Result<Self> {
        Ok(self
            .daily_at(time)?
            .spliced(CronExpression::DAY_OF_MONTH, day))
    }

    pub fn twice_monthly(self, first: u8, second: u8, time: &str) -> Result<Self> {
        Ok(self
            .daily_at(time)?
            .spliced(CronExpression::DAY_OF_MONTH, format!("{first},{second}")))
    }

    /// Pin the day-of-month to the final day of the *current* month.
    ///
    /// Resolved once, when this combinator runs. A schedule built in January
    /// keeps day 31 through February; rebuild the schedule (or use a month-end
    /// cron expression) if that staleness matters.
    pub fn last_day_of_month(self, time: &str) -> Result<Self> {
        Ok(self
            .daily_at(time)?
            .spliced(CronExpression::DAY_OF_MONTH, last_day_of_current_month()))
    }

    /// First day of January, April, July and October at midnight.
    pub fn quarterly(self) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
            .spliced(CronExpression::HOUR, 0)
            .spliced(CronExpression::DAY_OF_MONTH, 1)
            .spliced(CronExpression::MONTH, "1-12/3")
    }

    /// First of January at midnight.
    pub fn yearly(self) -> Self {
        self.spliced(CronExpression::MINUTE, 0)
            .spliced(CronExpression::HOUR, 0)
            .spliced(CronExpression::DAY_OF_MONTH, 1)
            .spliced(CronExpression::MONTH, 1)
    }

    pub fn yearly_on(self, month: u8, day: u8, time: &str) -> Result<Self> {
        Ok(self
            .daily_at(time)?
            .spliced(CronExpression::DAY_OF_MONTH, day)
            .spliced(CronExpression::MONTH, month))
    }

    // --- windows and predicates ---------------------------------------------

    /// Only run while the local clock is inside `[start, end)`.
    ///
    /// The window is re-evaluated on every tick against the schedule's
    /// timezone, and an `end` before `start` is treated as crossing midnight,
    /// so 22:00-02:00 holds at 23:30 and at 01:00 on any date.
    pub fn between(mut self, start: &str, end: &str) -> Result<Self> {
        let (start, end) = (TimeOfDay::parse(start)?, TimeOfDay::parse(end)?);
        self.filters
            .when_named(format!("between {start}-{end}"), move |ctx: &FilterContext| {
                Ok(in_window(ctx.local_now, start, end))
            });
        Ok(self)
    }

    /// Skip runs while the local clock is inside `[start, end)`.
    pub fn unless_between(mut self, start: &str, end: &str) -> Result<Self> {
        let (start, end) = (TimeOfDay::parse(start)?, TimeOfDay::parse(end)?);
        self.filters
            .skip_named(format!("unless-between {start}-{end}"), move |ctx: &FilterContext| {
                Ok(in_window(ctx.local_now, start, end))
            });
        Ok(self)
    }

    /// Append a must-pass predicate: the run is skipped unless it holds.
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FilterContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.filters.when(predicate);
        self
    }

    /// Append a reject predicate: the run is skipped whenever it holds.
    pub fn skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FilterContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.filters.skip(predicate);
        self
    }

    // --- execution policy -----------------------------------------------------

    /// Evaluate the expression and time windows in the given IANA zone
    /// instead of the process-local one. Unknown identifiers fail fast.
    pub fn timezone(mut self, zone: &str) -> Result<Self> {
        self.timezone = Some(
            zone.parse::<Tz>()
                .map_err(|_| ScheduleError::UnknownTimezone(zone.to_string()))?,
        );
        Ok(self)
    }

    /// The explicitly configured zone, if any. `None` means the process-local
    /// timezone applies.
    pub fn configured_timezone(&self) -> Option<Tz> {
        self.timezone
    }

    /// Prevent overlapping runs with the default one-day lease.
    pub fn without_overlapping(self) -> Self {
        self.without_overlapping_for(DEFAULT_LEASE_MINUTES)
    }

    /// Prevent overlapping runs; a holder that crashes without releasing
    /// blocks rivals for at most `lease_minutes`.
    pub fn without_overlapping_for(mut self, lease_minutes: u64) -> Self {
        self.prevent_overlap = true;
        self.lease_minutes = lease_minutes;
        // The probe result is resolved by the runner before the chain is
        // walked, so a concurrent holder is filtered out ahead of any
        // acquisition attempt.
        self.filters
            .skip_named("overlap guard", |ctx: &FilterContext| Ok(ctx.lease_held));
        self
    }

    /// Advisory flag: across a multi-server deployment, run on at most one
    /// host per tick. Enforced with the same task mutex.
    pub fn on_one_server(mut self) -> Self {
        self.single_server = true;
        self
    }

    /// Attach an opaque payload handed to the task body on every run.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    // --- evaluation ---------------------------------------------------------

    /// Does the expression match `now` in the schedule's timezone?
    pub fn is_due(&self, now: DateTime<Utc>) -> Result<bool> {
        let due = match self.timezone {
            Some(tz) => self.expression.is_due(now.with_timezone(&tz))?,
            None => self.expression.is_due(now.with_timezone(&Local))?,
        };
        Ok(due)
    }

    /// Next matching instant strictly after `from`, reported in UTC.
    pub fn next_run(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let next = match self.timezone {
            Some(tz) => self
                .expression
                .next_run(from.with_timezone(&tz))?
                .with_timezone(&Utc),
            None => self
                .expression
                .next_run(from.with_timezone(&Local))?
                .with_timezone(&Utc),
        };
        Ok(next)
    }

    /// `now` as wall-clock time in the schedule's timezone, for predicates.
    pub fn local_now(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self.timezone {
            Some(tz) => now.with_timezone(&tz).naive_local(),
            None => now.with_timezone(&Local).naive_local(),
        }
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn prevents_overlap(&self) -> bool {
        self.prevent_overlap
    }

    pub fn single_server(&self) -> bool {
        self.single_server
    }

    /// Mutex lease for this schedule's runs.
    pub fn lease(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_minutes * 60)
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    // --- private helpers ------------------------------------------------------

    fn spliced(mut self, position: u8, value: impl ToString) -> Self {
        // Positions here are the crate's own constants and values are fixed
        // tokens or formatted integers, so the edit cannot fail.
        self.expression = self
            .expression
            .with_field(position, value.to_string())
            .expect("in-range field edit");
        self
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

fn last_day_of_current_month() -> u32 {
    let today = Local::now().date_naive();
    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    // The first of a month always exists and always has a predecessor.
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .expect("valid first of month")
        .day()
}
