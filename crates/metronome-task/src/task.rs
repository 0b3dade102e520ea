use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work the scheduler can run.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable identity for this kind of task. The mutex key derives from it,
    /// so every registration reporting the same name shares one lock
    /// regardless of how the instances were constructed.
    fn name(&self) -> &str;

    /// The body. The payload is whatever the schedule attached, `Null` when
    /// nothing was. A returned detail string surfaces in the run outcome.
    async fn execute(&self, payload: &Value) -> anyhow::Result<Option<String>>;
}

/// What a single run produced. Recorded on the task state, never
/// interpreted by the runner itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RunOutcome {
    /// The body ran to completion. Detail is whatever the task returned.
    Completed { detail: Option<String> },
    /// A filter declined the run; the body never started.
    Skipped { reason: String },
    /// Another holder owned the task mutex; the body never started.
    MutexHeld,
    /// The body returned an error or panicked. The message is kept here and
    /// the failure also re-surfaces from the runner once release completed.
    Failed { error: String },
}

impl RunOutcome {
    /// True for outcomes where the body actually ran.
    pub fn executed(&self) -> bool {
        matches!(
            self,
            RunOutcome::Completed { .. } | RunOutcome::Failed { .. }
        )
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::Skipped { .. } => "skipped",
            RunOutcome::MutexHeld => "mutex_held",
            RunOutcome::Failed { .. } => "failed",
        };
        write!(f, "{label}")
    }
}

/// Mutable run-tracking half of a registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskState {
    /// Start of the most recent run that reached the body.
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<RunOutcome>,
    pub last_duration_ms: Option<u64>,
    /// Number of body executions. Skips and mutex losses do not count.
    pub run_count: u64,
}

impl TaskState {
    /// Record an outcome that never reached the body.
    pub fn record_skip(&mut self, outcome: RunOutcome) {
        self.last_outcome = Some(outcome);
    }

    /// Record an executed body.
    pub fn record_run(&mut self, outcome: RunOutcome, at: DateTime<Utc>, duration_ms: u64) {
        self.last_run_at = Some(at);
        self.last_duration_ms = Some(duration_ms);
        self.run_count += 1;
        self.last_outcome = Some(outcome);
    }
}
