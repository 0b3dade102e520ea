use thiserror::Error;

use metronome_cron::CronError;
use metronome_lock::LockError;

/// Errors raised while declaring a schedule.
///
/// These are configuration mistakes and fail fast at build time, so an
/// invalid schedule can never silently run at the wrong moments.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A time-of-day string was not `"H"` or `"H:M"` in 24-hour form.
    #[error("Invalid time of day {input:?}: expected \"H\" or \"H:M\" (24-hour)")]
    InvalidTimeFormat { input: String },

    /// The timezone identifier is not a known IANA zone.
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    /// The underlying cron expression rejected an edit or failed to evaluate.
    #[error("Cron error: {0}")]
    Cron(#[from] CronError),
}

/// Errors raised while running a task.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A filter predicate failed while being evaluated. Distinct from a
    /// predicate returning false: the chain could not produce an answer.
    #[error("Filter evaluation failed: {0:#}")]
    Filter(anyhow::Error),

    /// The lock backend was unreachable. Acquisition fails closed, so the
    /// run is refused rather than executed unprotected.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// The task body returned an error or panicked. Recorded on the task
    /// state first, then surfaced here after the mutex release completed.
    #[error("Task execution failed: {0}")]
    Execution(String),
}

pub type Result<T, E = ScheduleError> = std::result::Result<T, E>;
