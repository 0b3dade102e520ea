//! `metronome-task` — task declaration and execution.
//!
//! # Overview
//!
//! A registration pairs a [`Task`] (the work) with a [`Schedule`] (when it
//! fires and under which policy). Once a tick finds the schedule due, the
//! [`TaskRunner`] takes the registration through the gauntlet: the filter
//! chain, then the task mutex when exclusion was requested, then the body,
//! releasing the mutex on every exit path and recording a [`RunOutcome`]
//! onto the [`TaskState`].
//!
//! # Schedule surface
//!
//! | Family   | Combinators                                                         |
//! |----------|---------------------------------------------------------------------|
//! | Minutes  | `every_minute` .. `every_thirty_minutes`                            |
//! | Hours    | `hourly`, `hourly_at`, `every_two_hours` .. `every_six_hours`       |
//! | Days     | `daily`, `daily_at`, `twice_daily`, per-day shorthands, `days`      |
//! | Calendar | `weekly[_on]`, `monthly[_on]`, `twice_monthly`, `last_day_of_month`, `quarterly`, `yearly[_on]` |
//! | Windows  | `between`, `unless_between`                                         |
//! | Policy   | `timezone`, `without_overlapping[_for]`, `on_one_server`, `when`, `skip`, `with_payload` |

pub mod error;
pub mod filter;
pub mod runner;
pub mod schedule;
pub mod task;
pub mod time;

pub use error::{Result, RunnerError, ScheduleError};
pub use filter::{FilterChain, FilterContext};
pub use runner::TaskRunner;
pub use schedule::{Schedule, DEFAULT_LEASE_MINUTES};
pub use task::{RunOutcome, Task, TaskState};
pub use time::TimeOfDay;
