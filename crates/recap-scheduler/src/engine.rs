use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use recap_core::types::{
    Destination, ExecutionStatus, Schedule, ScheduledTask, TaskExecution, DEFAULT_MAX_FAILURES,
    DEFAULT_RETRY_DELAY_MINUTES,
};
use recap_core::{RecapError, Result, SummaryOptions, SummaryRequest};
use recap_engine::SummaryEngine;
use recap_store::Store;

use crate::delivery::Deliverer;
use crate::schedule::{next_run, window_for};

/// Input for task creation from the command handler or REST adapter.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub channel_id: String,
    pub guild_id: String,
    pub schedule: Schedule,
    pub destinations: Vec<Destination>,
    pub options: SummaryOptions,
    pub created_by: String,
}

/// Drives scheduled summaries: wakes every tick, executes due tasks, and
/// persists each task's new scheduling state together with its execution
/// record in one transaction.
pub struct Scheduler {
    store: Arc<Store>,
    engine: Arc<SummaryEngine>,
    deliverer: Deliverer,
    tick_interval: StdDuration,
    execution_timeout: StdDuration,
    reload: Notify,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        engine: Arc<SummaryEngine>,
        deliverer: Deliverer,
        tick_interval: StdDuration,
        execution_timeout: StdDuration,
    ) -> Self {
        Self {
            store,
            engine,
            deliverer,
            tick_interval,
            execution_timeout,
            reload: Notify::new(),
        }
    }

    /// Wake the loop early after task mutations.
    pub fn notify_reload(&self) {
        self.reload.notify_one();
    }

    /// Validate, persist, and arm a new task. Duplicate (guild, name) pairs
    /// are rejected before hitting the store's unique index.
    pub fn create_task(&self, new: NewTask) -> Result<ScheduledTask> {
        new.options.validate()?;
        if new.name.trim().is_empty() {
            return Err(RecapError::UserInput("task name is required".to_string()));
        }
        if new.destinations.is_empty() {
            return Err(RecapError::UserInput(
                "at least one delivery destination is required".to_string(),
            ));
        }
        if let Schedule::Cron { expression } = &new.schedule {
            crate::cron::CronExpr::parse(expression)
                .map_err(|e| RecapError::UserInput(format!("bad cron expression: {e}")))?;
        }
        if self.store.task_by_name(&new.guild_id, &new.name)?.is_some() {
            return Err(RecapError::StoreConstraint(format!(
                "task '{}' already exists in this guild",
                new.name
            )));
        }

        let now = Utc::now();
        let task = ScheduledTask {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            channel_id: new.channel_id,
            guild_id: new.guild_id,
            next_run: next_run(&new.schedule, now),
            schedule: new.schedule,
            destinations: new.destinations,
            options: new.options,
            active: true,
            created_at: now,
            created_by: new.created_by,
            last_run: None,
            consecutive_failures: 0,
            max_failures: DEFAULT_MAX_FAILURES,
            retry_delay_minutes: DEFAULT_RETRY_DELAY_MINUTES,
        };
        self.store.save_task(&task)?;
        info!(task_id = %task.id, name = %task.name, next_run = ?task.next_run, "task created");
        self.notify_reload();
        Ok(task)
    }

    pub fn pause_task(&self, id: &str) -> Result<()> {
        self.store.set_task_active(id, false)?;
        info!(task_id = %id, "task paused");
        Ok(())
    }

    /// Reactivate and recompute `next_run` from the wall clock.
    pub fn resume_task(&self, id: &str) -> Result<()> {
        let task = self.store.get_task(id)?;
        self.store.set_task_active(id, true)?;
        self.store
            .set_task_next_run(id, next_run(&task.schedule, Utc::now()))?;
        info!(task_id = %id, "task resumed");
        self.notify_reload();
        Ok(())
    }

    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.store.delete_task(id)?;
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Main loop. Runs until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler started");

        // Executions stranded mid-run by a crash are failed here; their
        // tasks still hold their old next_run, so the tick below re-picks
        // each overdue task exactly once.
        match self.store.fail_stale_executions(Utc::now()) {
            Ok(n) if n > 0 => warn!(count = n, "stale executions failed on startup"),
            Err(e) => error!(error = %e, "stale-execution sweep failed"),
            _ => {}
        }

        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = self.reload.notified() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "scheduler reload tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Execute every task whose `next_run` has arrived. Returns how many ran.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.store.due_tasks(now)?;
        let count = due.len();
        for task in due {
            self.execute_task(task, now).await;
        }
        Ok(count)
    }

    async fn execute_task(&self, mut task: ScheduledTask, now: DateTime<Utc>) {
        let started = std::time::Instant::now();
        let mut execution = TaskExecution {
            id: Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            status: ExecutionStatus::Running,
            started_at: now,
            completed_at: None,
            summary_id: None,
            error: None,
            deliveries: Vec::new(),
            duration_ms: 0,
        };
        if let Err(e) = self.store.insert_execution(&execution) {
            error!(task_id = %task.id, error = %e, "could not record execution start");
            return;
        }

        info!(task_id = %task.id, name = %task.name, "executing scheduled task");

        let (start, end) = window_for(&task.schedule, now);
        let request = SummaryRequest {
            channel_id: task.channel_id.clone(),
            guild_id: task.guild_id.clone(),
            start,
            end,
            options: task.options.clone(),
        };

        let cancel = CancellationToken::new();
        let outcome = match tokio::time::timeout(
            self.execution_timeout,
            self.engine.summarize(request, &cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(RecapError::Internal(format!(
                    "execution exceeded {}s budget",
                    self.execution_timeout.as_secs()
                )))
            }
        };

        match outcome {
            Ok(summary) => {
                let secret = self
                    .store
                    .guild_config_or_default(&task.guild_id)
                    .ok()
                    .and_then(|cfg| cfg.webhook_secret);
                for destination in &task.destinations {
                    let result = self
                        .deliverer
                        .deliver(destination, &summary, secret.as_deref())
                        .await;
                    execution.deliveries.push(result);
                }

                execution.status = ExecutionStatus::Completed;
                execution.summary_id = Some(summary.id.clone());
                task.consecutive_failures = 0;
                task.last_run = Some(now);
                // One-shot schedules retire after their single run.
                task.next_run = match task.schedule {
                    Schedule::Once { .. } => None,
                    _ => next_run(&task.schedule, now),
                };
                if task.next_run.is_none() {
                    task.active = false;
                }
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "scheduled task failed");
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(e.to_string());
                task.consecutive_failures += 1;
                task.last_run = Some(now);
                if task.consecutive_failures >= task.max_failures {
                    warn!(
                        task_id = %task.id,
                        failures = task.consecutive_failures,
                        "failure budget exhausted, deactivating task"
                    );
                    task.active = false;
                    task.next_run = None;
                } else {
                    task.next_run =
                        Some(now + Duration::minutes(task.retry_delay_minutes as i64));
                }
            }
        }

        execution.completed_at = Some(Utc::now());
        execution.duration_ms = started.elapsed().as_millis() as u64;

        // Task state and terminal execution commit together; a crash before
        // this point leaves next_run untouched for the at-least-once re-pick.
        if let Err(e) = self.store.finish_task_run(&task, &execution) {
            error!(task_id = %task.id, error = %e, "could not commit execution result");
        }
    }
}
