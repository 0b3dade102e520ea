use chrono::{DateTime, Utc};
use metronome_task::RunOutcome;
use serde::{Deserialize, Serialize};

/// Record of one schedule entry that came due: what ran, how it went and
/// when it is due next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Registered task name.
    pub task: String,
    /// The tick instant that found the schedule due.
    pub fired_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Wall-clock body time. `None` when the body never started.
    pub duration_ms: Option<u64>,
    /// Next due instant, when one exists inside the search horizon.
    pub next_run: Option<DateTime<Utc>>,
}
