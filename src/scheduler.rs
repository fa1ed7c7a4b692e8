//! Interval scheduler.
//!
//! A single tick loop re-scans the configs directory, reloads each job
//! definition and dispatches due jobs to a bounded worker pool. The loop
//! itself never awaits job work, so one slow job cannot delay the others.
//!
//! Scheduling is by dispatch time: the last-dispatch timestamp is recorded
//! when a run is submitted, so a run that outlasts its interval can overlap
//! with the next one.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::collector::JobRunner;
use crate::config::{DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TICK, DEFAULT_WORKERS, JobDefinition, SchedulerConfig};

/// Last-dispatch time per job file. In memory only.
#[derive(Debug, Clone, Default)]
pub struct ScheduleState {
    last_dispatch: HashMap<PathBuf, DateTime<Utc>>,
}

impl ScheduleState {
    /// Empty state: every job is due.
    pub fn new() -> Self {
        Self::default()
    }

    /// When `job` was last dispatched.
    pub fn last_dispatch(&self, job: &Path) -> Option<DateTime<Utc>> {
        self.last_dispatch.get(job).copied()
    }

    /// Record a dispatch of `job` at `at`.
    pub fn record(&mut self, job: PathBuf, at: DateTime<Utc>) {
        self.last_dispatch.insert(job, at);
    }

    /// Number of jobs ever dispatched.
    pub fn len(&self) -> usize {
        self.last_dispatch.len()
    }

    /// True if nothing was dispatched yet.
    pub fn is_empty(&self) -> bool {
        self.last_dispatch.is_empty()
    }
}

/// Due-ness rule.
///
/// No interval (absent or zero) means always due; never dispatched means
/// due; otherwise due once `now - last >= interval`.
pub fn is_due(interval: Option<Duration>, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let (Some(interval), Some(last)) = (interval.filter(|i| !i.is_zero()), last) else {
        return true;
    };
    match chrono::Duration::from_std(interval) {
        Ok(interval) => now.signed_duration_since(last) >= interval,
        Err(_) => false,
    }
}

/// Job files in `dir`: `*.yaml` and `*.yml`, sorted by path.
///
/// # Errors
/// Returns the I/O error if `dir` cannot be read.
pub fn scan_job_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Drives job runs on independent intervals.
pub struct Scheduler {
    configs_dir: PathBuf,
    tick: Duration,
    shutdown_timeout: Duration,
    workers: usize,
    permits: Arc<Semaphore>,
    runner: Arc<dyn JobRunner>,
    state: ScheduleState,
    tasks: JoinSet<()>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("configs_dir", &self.configs_dir)
            .field("tick", &self.tick)
            .field("workers", &self.workers)
            .field("in_flight", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler with default tick, pool size and shutdown wait.
    pub fn new(configs_dir: impl Into<PathBuf>, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            configs_dir: configs_dir.into(),
            tick: DEFAULT_TICK,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            workers: DEFAULT_WORKERS,
            permits: Arc::new(Semaphore::new(DEFAULT_WORKERS)),
            runner,
            state: ScheduleState::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Create a scheduler from configuration.
    pub fn from_config(config: &SchedulerConfig, runner: Arc<dyn JobRunner>) -> Self {
        Self::new(&config.configs_dir, runner)
            .with_tick(config.tick)
            .with_workers(config.workers)
            .with_shutdown_timeout(config.shutdown_timeout)
    }

    /// Set the tick period.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Set the worker pool size (minimum 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self.permits = Arc::new(Semaphore::new(self.workers));
        self
    }

    /// Set the shutdown wait for in-flight runs.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Scheduling state.
    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Dispatched runs not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// One scheduling pass at `now`. Returns the number of dispatched runs.
    ///
    /// Unreadable or invalid job files are logged and skipped for this tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> usize {
        self.reap();

        let files = match scan_job_files(&self.configs_dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %self.configs_dir.display(), error = %e, "Cannot scan configs directory");
                return 0;
            }
        };

        let mut dispatched = 0;
        for path in files {
            let job = match JobDefinition::load(&path) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping job definition");
                    continue;
                }
            };

            let interval = job.config.schedule.interval();
            if !is_due(interval, self.state.last_dispatch(&path), now) {
                continue;
            }

            tracing::info!(job = %job.name, "Triggering job");
            self.state.record(path, now);
            self.dispatch(job);
            dispatched += 1;
        }
        dispatched
    }

    /// Queue one run. The permit is taken inside the task, so a due job is
    /// queued even while every worker is busy; with runs that outlast the
    /// tick, always-due jobs pile up in the task set without bound.
    fn dispatch(&mut self, job: JobDefinition) {
        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.permits);

        self.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let name = job.name.clone();
            let run = tokio::spawn(async move { runner.run(job).await });

            match run.await {
                Ok(Ok(report)) => tracing::debug!(job = %name, %report, "Job run complete"),
                Ok(Err(e)) => tracing::error!(job = %name, error = %e, "Job run failed"),
                Err(e) if e.is_panic() => tracing::error!(job = %name, "Job run panicked"),
                Err(e) => tracing::warn!(job = %name, error = %e, "Job run cancelled"),
            }
        });
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch task failed");
            }
        }
    }

    /// Wait for every dispatched run to finish.
    pub async fn wait_idle(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch task failed");
            }
        }
    }

    /// Tick until `shutdown` resolves, then wait (bounded) for in-flight runs.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            configs_dir = %self.configs_dir.display(),
            tick = ?self.tick,
            workers = self.workers,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.tick(Utc::now());
                }
            }
        }

        self.shutdown().await;
    }

    /// Stop and wait up to the shutdown timeout for in-flight runs.
    pub async fn shutdown(mut self) {
        let in_flight = self.tasks.len();
        tracing::info!(in_flight, "Scheduler stopping");

        let timeout = self.shutdown_timeout;
        if tokio::time::timeout(timeout, self.wait_idle()).await.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Scheduler shutdown timed out, abandoning in-flight runs"
            );
            self.tasks.abort_all();
        } else {
            tracing::info!("Scheduler shutdown complete");
        }
    }
}
