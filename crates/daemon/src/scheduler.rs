use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};
use placement_backup_core::{backup_error, BackupError, BackupRun, Clock, SystemClock};
use placement_backup_storage::BackupService;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// A parsed cron expression.
///
/// Accepts the six-field form with seconds (`sec min hour dom mon dow`) and the
/// classic five-field form, which is run at second zero.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, BackupError> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_owned()
        };
        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| BackupError::InvalidSchedule {
                expression: expression.to_owned(),
                message: e.to_string(),
            })?;
        Ok(Self {
            expression: trimmed.to_owned(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First trigger time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub running: bool,
    pub schedule: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct CycleState {
    next_run: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// One backup-then-prune cycle plus the bookkeeping shared with the trigger task.
struct Cycle {
    service: Arc<BackupService>,
    schedule: CronSchedule,
    clock: Arc<dyn Clock>,
    retention_days: u32,
    state: Mutex<CycleState>,
}

impl Cycle {
    fn state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn run(&self) -> Result<BackupRun> {
        let started = self.clock.now();
        let result = self.backup_then_prune().await;

        let mut state = self.state();
        state.last_run_at = Some(started);
        state.last_error = result.as_ref().err().map(|e| format!("{e:#}"));
        result
    }

    async fn backup_then_prune(&self) -> Result<BackupRun> {
        let run = self.service.create_backup().await?;
        let pruned = self.service.prune_expired(self.retention_days).await?;
        if !pruned.failed.is_empty() {
            warn!(
                failed = pruned.failed.len(),
                retention_days = self.retention_days,
                "some expired backups could not be pruned"
            );
        }
        Ok(run)
    }
}

struct TriggerTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs backup cycles on a cron schedule.
pub struct Scheduler {
    cycle: Arc<Cycle>,
    task: Mutex<Option<TriggerTask>>,
}

impl Scheduler {
    pub fn new(service: Arc<BackupService>, schedule: CronSchedule, retention_days: u32) -> Self {
        Self::with_clock(service, schedule, retention_days, Arc::new(SystemClock))
    }

    pub fn with_clock(
        service: Arc<BackupService>,
        schedule: CronSchedule,
        retention_days: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cycle: Arc::new(Cycle {
                service,
                schedule,
                clock,
                retention_days,
                state: Mutex::new(CycleState::default()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Begins periodic triggering. Calling it again while running only logs a warning.
    pub fn start(&self) {
        let mut task = self.task();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            warn!(schedule = %self.cycle.schedule.expression(), "scheduler already running");
            return;
        }

        let first = self.cycle.schedule.next_after(self.cycle.clock.now());
        self.cycle.state().next_run = first;

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(trigger_loop(Arc::clone(&self.cycle), stop_rx, first));
        *task = Some(TriggerTask { stop, handle });
        info!(
            schedule = %self.cycle.schedule.expression(),
            next_run = ?first,
            "backup scheduler started"
        );
    }

    /// Cancels future triggers. A cycle already underway runs to completion.
    pub fn stop(&self) {
        let Some(task) = self.task().take() else {
            return;
        };
        let mut state = self.cycle.state();
        task.stop.send_replace(true);
        state.next_run = None;
        info!("backup scheduler stopped");
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self
            .task()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished());
        let state = self.cycle.state();
        SchedulerStatus {
            running,
            schedule: self.cycle.schedule.expression().to_owned(),
            next_run_time: if running { state.next_run } else { None },
            last_run_at: state.last_run_at,
            last_error: state.last_error.clone(),
        }
    }

    /// Runs one cycle now, outside the schedule, and returns its result.
    pub async fn run_now(&self) -> Result<BackupRun> {
        self.cycle.run().await
    }

    fn task(&self) -> MutexGuard<'_, Option<TriggerTask>> {
        self.task.lock().unwrap_or_else(|p| p.into_inner())
    }
}

async fn trigger_loop(
    cycle: Arc<Cycle>,
    mut stop: watch::Receiver<bool>,
    mut next: Option<DateTime<Utc>>,
) {
    while let Some(at) = next {
        let wait = (at - cycle.clock.now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = sleep(wait) => {}
            _ = stop.changed() => break,
        }

        match cycle.run().await {
            Ok(run) => info!(backup_id = %run.id, "scheduled backup completed"),
            Err(e) if backup_error(&e).is_some_and(BackupError::is_busy) => {
                warn!(error = %e, "skipping scheduled backup")
            }
            Err(e) => error!(error = %e, "scheduled backup failed"),
        }

        next = cycle.schedule.next_after(cycle.clock.now().max(at));
        let mut state = cycle.state();
        if stop.has_changed().unwrap_or(true) {
            break;
        }
        state.next_run = next;
    }

    if next.is_none() {
        warn!(schedule = %cycle.schedule.expression(), "schedule has no further trigger times");
    }
}
