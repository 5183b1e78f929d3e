//! Recurring triggers for persisted tasks.
//!
//! Each registered task owns a trigger loop that sleeps until the next fire
//! time of its schedule and then hands a snapshot of the task to the runner
//! on a fresh tokio task. Firings of the same task may overlap.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::SqlitePool;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::database as db;
use crate::models::{Task, TaskId};
use crate::runner::TaskRunner;
use crate::schedule::{CronSpec, ScheduleError};

/// What a trigger executes on every fire
#[derive(Debug)]
pub struct TaskContext {
    /// Snapshot taken at registration
    pub task: Task,
    pub schedule: CronSpec,
}

struct Trigger {
    context: Arc<TaskContext>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    runner: Arc<TaskRunner>,
    triggers: Mutex<HashMap<TaskId, Trigger>>,
    token: CancellationToken,
    /// Runtime the triggers live on, whichever thread registers them
    handle: Handle,
}

impl Scheduler {
    /// Must be called from within the tokio runtime that should drive the triggers
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        Self {
            runner,
            triggers: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
            handle: Handle::current(),
        }
    }

    pub fn runner(&self) -> Arc<TaskRunner> {
        self.runner.clone()
    }

    /// Starts firing `task` on its schedule. Registering the same id again
    /// replaces the previous trigger.
    pub fn register_task(&self, task: Task) -> Result<(), ScheduleError> {
        let schedule: CronSpec = task.time_interval.parse()?;
        let task_id = task.task_id;
        let context = Arc::new(TaskContext { task, schedule });

        let handle = self.handle.spawn(trigger_loop(
            context.clone(),
            self.runner.clone(),
            self.token.child_token(),
        ));

        let previous = self
            .triggers
            .lock()
            .insert(task_id, Trigger { context, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
            log::info!("Replaced trigger of task {task_id}");
        } else {
            log::info!("Registered task {task_id} with schedule \"{schedule}\"");
        }
        Ok(())
    }

    /// Registers every persisted task. Returns how many were registered;
    /// tasks with an unreadable schedule are logged and left out.
    pub async fn recover(&self, pool: Arc<SqlitePool>) -> sqlx::Result<usize> {
        let tasks = db::list_tasks(pool).await?;
        let total = tasks.len();

        let mut registered = 0;
        for task in tasks {
            let task_id = task.task_id;
            match self.register_task(task) {
                Ok(()) => registered += 1,
                Err(e) => log::error!("Cannot recover task {task_id}: {e}"),
            }
        }

        log::info!("Recovered {registered} of {total} persisted tasks");
        Ok(registered)
    }

    /// Ids of all registered tasks, ascending
    pub fn registered(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.triggers.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The snapshot a task's trigger is running with
    pub fn snapshot(&self, task_id: TaskId) -> Option<Task> {
        self.triggers
            .lock()
            .get(&task_id)
            .map(|trigger| trigger.context.task.clone())
    }

    /// Stops every trigger loop. Executions already in flight run to completion.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let triggers = std::mem::take(&mut *self.triggers.lock());

        for (task_id, trigger) in triggers {
            if let Err(e) = trigger.handle.await {
                if e.is_panic() {
                    log::error!("Trigger of task {task_id} panicked: {e:?}");
                }
            }
        }
        log::info!("Scheduler stopped");
    }
}

async fn trigger_loop(
    context: Arc<TaskContext>,
    runner: Arc<TaskRunner>,
    token: CancellationToken,
) {
    let task_id = context.task.task_id;
    let mut cursor = Utc::now();

    loop {
        let Some(next) = context.schedule.next_after(cursor) else {
            log::error!("Task {task_id} has no next fire time after {cursor}, trigger stopped");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = token.cancelled() => {
                log::debug!("Trigger of task {task_id} cancelled");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }
        cursor = resume_after(next, Utc::now());

        let runner = runner.clone();
        let context = context.clone();
        tokio::spawn(async move {
            runner.run(&context.task, next).await;
        });
    }
}

/// Where the search for the following fire time starts. Slots the wall clock
/// has already passed (after a clock step or a suspended host) are skipped
/// rather than replayed.
fn resume_after(fired: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    fired.max(now)
}
