use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metronome_lock::{LockStore, MemoryLockStore};
use metronome_task::{RunOutcome, Schedule, Task, TaskRunner, TaskState};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::report::RunReport;

struct ScheduledTask {
    task: Arc<dyn Task>,
    schedule: Schedule,
    state: TaskState,
    last_fired_bucket: Option<i64>,
}

/// Tick-driven scheduler owning the task registrations.
///
/// Each tick evaluates every registered schedule against the current
/// instant and runs the due ones in registration order, one at a time. A
/// due minute fires a task once no matter how fine the tick interval is.
pub struct Engine {
    config: EngineConfig,
    runner: TaskRunner,
    entries: Vec<ScheduledTask>,
    history: VecDeque<RunReport>,
    report_tx: Option<mpsc::Sender<RunReport>>,
}

impl Engine {
    /// Engine backed by a process-local lock store. Overlap and
    /// single-server policies then only coordinate within this process.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryLockStore::new()))
    }

    /// Engine backed by a shared lock store, so several processes
    /// coordinate on one mutex space.
    pub fn with_store(config: EngineConfig, store: Arc<dyn LockStore>) -> Self {
        Self {
            runner: TaskRunner::new(store),
            entries: Vec::new(),
            history: VecDeque::new(),
            report_tx: None,
            config,
        }
    }

    /// Register a task under the given schedule. When the schedule picks no
    /// timezone and the config carries `default_timezone`, that zone is
    /// applied here. Names should be unique; tasks sharing a name share an
    /// overlap mutex.
    pub fn register(&mut self, task: Arc<dyn Task>, schedule: Schedule) -> Result<()> {
        let schedule = match (&self.config.default_timezone, schedule.configured_timezone()) {
            (Some(zone), None) => schedule.timezone(zone)?,
            _ => schedule,
        };

        info!(
            task = %task.name(),
            expression = %schedule.expression(),
            "task registered"
        );
        self.entries.push(ScheduledTask {
            task,
            schedule,
            state: TaskState::default(),
            last_fired_bucket: None,
        });
        Ok(())
    }

    /// Subscribe to run reports. Delivery never blocks the tick loop, so a
    /// reader that falls behind loses reports (each loss is logged).
    pub fn reports(&mut self) -> mpsc::Receiver<RunReport> {
        let (tx, rx) = mpsc::channel(self.config.report_channel_capacity);
        self.report_tx = Some(tx);
        rx
    }

    /// Registered tasks with their schedules and latest state, in
    /// registration order.
    pub fn tasks(&self) -> impl Iterator<Item = (&str, &Schedule, &TaskState)> {
        self.entries
            .iter()
            .map(|entry| (entry.task.name(), &entry.schedule, &entry.state))
    }

    /// Most recent run reports, oldest first, capped by
    /// `run_history_limit`.
    pub fn recent_runs(&self) -> Vec<RunReport> {
        self.history.iter().cloned().collect()
    }

    /// Earliest upcoming due instant across all registrations, for hosts
    /// that want smarter sleeping than a fixed interval.
    pub fn next_wake(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter_map(|entry| entry.schedule.next_run(from).ok())
            .min()
    }

    /// Evaluate every registration against `now` and run the due ones.
    ///
    /// Public so hosts can drive their own cadence (pair with
    /// [`next_wake`](Self::next_wake)); [`run`](Self::run) calls this once
    /// per tick interval.
    #[instrument(skip_all, fields(now = %now))]
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        let bucket = minute_bucket(now);

        for index in 0..self.entries.len() {
            let report = {
                let entry = &mut self.entries[index];

                let due = match entry.schedule.is_due(now) {
                    Ok(due) => due,
                    Err(e) => {
                        error!(
                            task = %entry.task.name(),
                            error = %e,
                            "due check failed, entry skipped"
                        );
                        continue;
                    }
                };
                if !due || entry.last_fired_bucket == Some(bucket) {
                    continue;
                }
                entry.last_fired_bucket = Some(bucket);

                let outcome = match self
                    .runner
                    .run(entry.task.as_ref(), &entry.schedule, &mut entry.state, now)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(task = %entry.task.name(), error = %e, "task run failed");
                        RunOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                let duration_ms = if outcome.executed() {
                    entry.state.last_duration_ms
                } else {
                    None
                };

                RunReport {
                    task: entry.task.name().to_string(),
                    fired_at: now,
                    outcome,
                    duration_ms,
                    next_run: entry.schedule.next_run(now).ok(),
                }
            };

            info!(task = %report.task, outcome = %report.outcome, "task fired");
            self.record(report);
        }
    }

    /// Tick until `shutdown` broadcasts `true` (or its sender is dropped),
    /// then hand the engine back for inspection.
    ///
    /// A tick in flight when the signal arrives finishes first, so leases
    /// are released on the normal path; the final sweep retries any release
    /// that failed along the way.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Self {
        info!(
            tick_interval_secs = self.config.tick_interval_secs,
            tasks = self.entries.len(),
            "engine started"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs));
        // A stalled loop must not replay its missed ticks in a burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(Utc::now()).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("engine shutting down");
                        break;
                    }
                }
            }
        }

        self.runner.release_held().await;
        self
    }

    // --- private helpers ---

    fn record(&mut self, report: RunReport) {
        if let Some(tx) = &self.report_tx {
            if tx.try_send(report.clone()).is_err() {
                warn!(task = %report.task, "report channel full or closed, report dropped");
            }
        }
        self.history.push_back(report);
        while self.history.len() > self.config.run_history_limit {
            self.history.pop_front();
        }
    }
}

/// Minutes since the epoch; two instants in one calendar minute share a
/// bucket.
fn minute_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::error::EngineError;

    struct CountingTask {
        name: String,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for CountingTask {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _payload: &Value) -> anyhow::Result<Option<String>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    struct FailingTask;

    #[async_trait]
    impl Task for FailingTask {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self, _payload: &Value) -> anyhow::Result<Option<String>> {
            anyhow::bail!("database offline")
        }
    }

    fn counting(name: &str) -> (Arc<CountingTask>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(CountingTask {
            name: name.to_string(),
            runs: Arc::clone(&runs),
        });
        (task, runs)
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn every_minute_utc() -> Schedule {
        Schedule::new().every_minute().timezone("UTC").unwrap()
    }

    #[test]
    fn registering_applies_the_default_timezone() {
        let config = EngineConfig {
            default_timezone: Some("Asia/Tokyo".to_string()),
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config);
        let (task, _) = counting("plain");
        engine.register(task, Schedule::new().daily()).unwrap();
        let (task, _) = counting("pinned");
        engine
            .register(
                task,
                Schedule::new().daily().timezone("Europe/Paris").unwrap(),
            )
            .unwrap();

        let zones: Vec<_> = engine
            .tasks()
            .map(|(_, schedule, _)| schedule.configured_timezone())
            .collect();
        assert_eq!(zones[0], Some(chrono_tz::Asia::Tokyo));
        assert_eq!(zones[1], Some(chrono_tz::Europe::Paris));
    }

    #[test]
    fn unknown_default_timezone_fails_registration() {
        let config = EngineConfig {
            default_timezone: Some("Mars/Olympus".to_string()),
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config);
        let (task, _) = counting("plain");

        let err = engine.register(task, Schedule::new().daily()).unwrap_err();
        assert!(matches!(err, EngineError::Schedule(_)));
    }

    #[tokio::test]
    async fn due_entries_fire_and_are_reported() {
        let mut engine = Engine::new(EngineConfig::default());
        let (task, runs) = counting("heartbeat");
        engine.register(task, every_minute_utc()).unwrap();

        engine.tick(utc("2024-03-04T09:00:30Z")).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let history = engine.recent_runs();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].task, "heartbeat");
        assert!(history[0].outcome.executed());
        assert_eq!(history[0].next_run, Some(utc("2024-03-04T09:01:00Z")));
    }

    #[tokio::test]
    async fn a_due_minute_fires_only_once() {
        let mut engine = Engine::new(EngineConfig::default());
        let (task, runs) = counting("heartbeat");
        engine.register(task, every_minute_utc()).unwrap();

        engine.tick(utc("2024-03-04T09:00:10Z")).await;
        engine.tick(utc("2024-03-04T09:00:50Z")).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        engine.tick(utc("2024-03-04T09:01:00Z")).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn entries_that_are_not_due_stay_idle() {
        let mut engine = Engine::new(EngineConfig::default());
        let (task, runs) = counting("report");
        engine
            .register(
                task,
                Schedule::new().daily_at("9:00").unwrap().timezone("UTC").unwrap(),
            )
            .unwrap();

        engine.tick(utc("2024-03-04T10:00:00Z")).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(engine.recent_runs().is_empty());
    }

    #[tokio::test]
    async fn a_broken_expression_skips_only_its_own_entry() {
        let mut engine = Engine::new(EngineConfig::default());
        let (bad, bad_runs) = counting("bad");
        engine
            .register(bad, Schedule::new().cron("61 * * * *").unwrap())
            .unwrap();
        let (good, good_runs) = counting("good");
        engine.register(good, every_minute_utc()).unwrap();

        engine.tick(utc("2024-03-04T09:00:00Z")).await;

        assert_eq!(bad_runs.load(Ordering::SeqCst), 0);
        assert_eq!(good_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_recorded_not_fatal() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.register(Arc::new(FailingTask), every_minute_utc()).unwrap();

        engine.tick(utc("2024-03-04T09:00:00Z")).await;

        let history = engine.recent_runs();
        assert_eq!(history.len(), 1);
        assert!(matches!(history[0].outcome, RunOutcome::Failed { .. }));

        let (_, _, state) = engine.tasks().next().unwrap();
        assert_eq!(state.run_count, 1);
        assert!(matches!(
            state.last_outcome,
            Some(RunOutcome::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn reports_reach_the_channel() {
        let mut engine = Engine::new(EngineConfig::default());
        let mut reports = engine.reports();
        let (task, _) = counting("heartbeat");
        engine.register(task, every_minute_utc()).unwrap();

        let now = utc("2024-03-04T09:00:00Z");
        engine.tick(now).await;

        let report = reports.try_recv().unwrap();
        assert_eq!(report.task, "heartbeat");
        assert_eq!(report.fired_at, now);
        assert!(report.outcome.executed());
        assert!(report.duration_ms.is_some());
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let config = EngineConfig {
            run_history_limit: 2,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config);
        let (task, _) = counting("heartbeat");
        engine.register(task, every_minute_utc()).unwrap();

        engine.tick(utc("2024-03-04T09:00:00Z")).await;
        engine.tick(utc("2024-03-04T09:01:00Z")).await;
        engine.tick(utc("2024-03-04T09:02:00Z")).await;

        let history = engine.recent_runs();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].fired_at, utc("2024-03-04T09:01:00Z"));
        assert_eq!(history[1].fired_at, utc("2024-03-04T09:02:00Z"));
    }

    #[test]
    fn next_wake_picks_the_earliest_entry() {
        let mut engine = Engine::new(EngineConfig::default());
        let (task, _) = counting("noon");
        engine
            .register(
                task,
                Schedule::new().daily_at("12:00").unwrap().timezone("UTC").unwrap(),
            )
            .unwrap();
        let (task, _) = counting("morning");
        engine
            .register(
                task,
                Schedule::new().daily_at("9:30").unwrap().timezone("UTC").unwrap(),
            )
            .unwrap();

        assert_eq!(
            engine.next_wake(utc("2024-03-04T08:00:00Z")),
            Some(utc("2024-03-04T09:30:00Z")),
        );
    }

    #[test]
    fn next_wake_is_none_without_entries() {
        let engine = Engine::new(EngineConfig::default());
        assert_eq!(engine.next_wake(utc("2024-03-04T08:00:00Z")), None);
    }

    #[tokio::test]
    async fn run_loop_honours_shutdown() {
        let config = EngineConfig {
            tick_interval_secs: 1,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config);
        let (task, runs) = counting("heartbeat");
        engine.register(task, every_minute_utc()).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();

        let engine = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        // The first tick fires immediately; the minute bucket blocks the rest.
        assert!(runs.load(Ordering::SeqCst) >= 1);
        assert!(!engine.recent_runs().is_empty());
    }

    #[tokio::test]
    async fn dropping_the_shutdown_sender_stops_the_loop() {
        let config = EngineConfig {
            tick_interval_secs: 1,
            ..EngineConfig::default()
        };
        let engine = Engine::new(config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(shutdown_rx));
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
