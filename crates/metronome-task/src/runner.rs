use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tracing::{debug, instrument, warn};

use metronome_lock::{LockStore, TaskMutex};

use crate::error::RunnerError;
use crate::filter::FilterContext;
use crate::schedule::Schedule;
use crate::task::{RunOutcome, Task, TaskState};

/// Gates a due task through its filters and the task mutex, executes the
/// body, and guarantees the mutex is released on every exit from execution.
///
/// Release has two layers. The primary one lives in [`run`](Self::run)
/// itself: the body executes under panic capture and release happens before
/// the result is interpreted, so normal returns, error returns and panics
/// all release. The second, [`release_held`](Self::release_held), is a
/// best-effort sweep for runs that never reached the primary path, such as
/// a tick future cancelled mid-execution or a host shutting down. Neither
/// layer survives a power loss; the lease TTL is the mechanism that does.
pub struct TaskRunner {
    store: Arc<dyn LockStore>,
    /// Mutex keys acquired by this runner and not yet released.
    held: Mutex<HashSet<String>>,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            held: Mutex::new(HashSet::new()),
        }
    }

    /// Run `task` once under `schedule`'s policy, recording onto `state`.
    ///
    /// Filter declines and mutex losses are normal outcomes, not errors.
    /// Body failures are recorded on the state first, then returned as
    /// [`RunnerError::Execution`] after the mutex release completed.
    #[instrument(skip_all, fields(task = %task.name()))]
    pub async fn run(
        &self,
        task: &dyn Task,
        schedule: &Schedule,
        state: &mut TaskState,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, RunnerError> {
        let needs_mutex = schedule.prevents_overlap() || schedule.single_server();
        let mutex = TaskMutex::new(Arc::clone(&self.store), task.name(), schedule.lease());

        // The overlap guard predicate consumes this probe. A backend failure
        // here refuses the run instead of proceeding unprotected.
        let lease_held = if schedule.prevents_overlap() {
            mutex.exists().await?
        } else {
            false
        };

        let ctx = FilterContext {
            now,
            local_now: schedule.local_now(now),
            lease_held,
        };
        if !schedule.filters().passes(&ctx)? {
            let outcome = RunOutcome::Skipped {
                reason: "declined by filters".to_string(),
            };
            state.record_skip(outcome.clone());
            debug!("run skipped by filters");
            return Ok(outcome);
        }

        if needs_mutex {
            if !mutex.acquire().await? {
                state.record_skip(RunOutcome::MutexHeld);
                debug!(key = %mutex.key(), "mutex already held, run refused");
                return Ok(RunOutcome::MutexHeld);
            }
            self.held
                .lock()
                .expect("held-key set poisoned")
                .insert(mutex.key().to_string());
        }

        let started = Instant::now();
        let result = AssertUnwindSafe(task.execute(schedule.payload()))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if needs_mutex {
            self.release(&mutex).await;
        }

        let outcome = match result {
            Ok(Ok(detail)) => RunOutcome::Completed { detail },
            Ok(Err(error)) => RunOutcome::Failed {
                error: format!("{error:#}"),
            },
            Err(panic) => RunOutcome::Failed {
                error: format!("task panicked: {}", panic_message(panic)),
            },
        };
        state.record_run(outcome.clone(), now, duration_ms);

        if let RunOutcome::Failed { error } = outcome {
            return Err(RunnerError::Execution(error));
        }
        Ok(outcome)
    }

    /// Best-effort sweep releasing every mutex this runner still holds.
    ///
    /// Covers runs whose future was dropped before the in-scope release and
    /// orderly host shutdown. Backend errors are logged and left to the TTL.
    pub async fn release_held(&self) {
        let keys: Vec<String> = {
            let mut held = self.held.lock().expect("held-key set poisoned");
            held.drain().collect()
        };
        for key in keys {
            match self.store.remove(&key).await {
                Ok(()) => debug!(%key, "stale mutex released"),
                Err(e) => warn!(%key, error = %e, "stale mutex release failed, lease will expire"),
            }
        }
    }

    async fn release(&self, mutex: &TaskMutex) {
        match mutex.release().await {
            Ok(()) => {
                self.held
                    .lock()
                    .expect("held-key set poisoned")
                    .remove(mutex.key());
            }
            Err(e) => {
                // Key stays in the held set so the shutdown sweep retries.
                warn!(key = %mutex.key(), error = %e, "mutex release failed, lease will expire");
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
