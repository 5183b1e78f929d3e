//! One scheduled execution of a task, from window check to persisted log.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::adapters::{AdapterRegistry, ExecError};
use crate::database as db;
use crate::drift::{self, DriftError, ExtractionError, ResolveError, ZeroExpectedPolicy};
use crate::models::{MachineId, Task, TaskLog};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("machine {0} not found")]
    MachineNotFound(MachineId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cannot resolve input parameters: {0}")]
    Inputs(#[source] ResolveError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("execution task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid outputParameters: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("cannot resolve machine output values: {0}")]
    RealValues(#[source] ResolveError),

    #[error(transparent)]
    Drift(#[from] DriftError),
}

impl RunError {
    /// Pipeline step that failed, for operator logs
    pub fn stage(&self) -> &'static str {
        match self {
            RunError::MachineNotFound(_) => "machine lookup",
            RunError::Database(_) => "database",
            RunError::Inputs(_) => "input resolution",
            RunError::Exec(ExecError::Gate(_)) => "safety gate",
            RunError::Exec(_) | RunError::Join(_) => "execution",
            RunError::Extraction(_) => "output extraction",
            RunError::RealValues(_) | RunError::Drift(_) => "drift evaluation",
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Fired outside the validity window
    Skipped,
    Logged(TaskLog),
    /// Failed somewhere; nothing was written
    Dropped(RunError),
}

#[derive(Default)]
struct Counters {
    logged: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub logged: u64,
    pub skipped: u64,
    pub dropped: u64,
}

pub struct TaskRunner {
    pool: Arc<SqlitePool>,
    adapters: Arc<AdapterRegistry>,
    policy: ZeroExpectedPolicy,
    counters: Counters,
}

impl TaskRunner {
    pub fn new(
        pool: Arc<SqlitePool>,
        adapters: Arc<AdapterRegistry>,
        policy: ZeroExpectedPolicy,
    ) -> Self {
        Self {
            pool,
            adapters,
            policy,
            counters: Counters::default(),
        }
    }

    pub fn pool(&self) -> Arc<SqlitePool> {
        self.pool.clone()
    }

    pub fn adapters(&self) -> Arc<AdapterRegistry> {
        self.adapters.clone()
    }

    pub fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            logged: self.counters.logged.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Runs `task` as fired at `now`. Failures never propagate; each one is
    /// logged once and counted.
    pub async fn run(&self, task: &Task, now: DateTime<Utc>) -> RunOutcome {
        // Stored timestamps carry milliseconds
        let now = now.trunc_subsecs(3);

        if !task.is_within_window(now) {
            log::debug!("Task {} fired at {now} outside its window, skipping", task.task_id);
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return RunOutcome::Skipped;
        }

        match self.execute(task, now).await {
            Ok(log) => {
                log::info!(
                    "Task {} logged run {} with status {:?}",
                    task.task_id,
                    log.task_log_id,
                    log.status
                );
                self.counters.logged.fetch_add(1, Ordering::Relaxed);
                RunOutcome::Logged(log)
            }
            Err(e) => {
                log::warn!(
                    "Dropped execution of task {} at stage {}: {e}",
                    task.task_id,
                    e.stage()
                );
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                RunOutcome::Dropped(e)
            }
        }
    }

    async fn execute(&self, task: &Task, now: DateTime<Utc>) -> Result<TaskLog, RunError> {
        let machine = db::get_machine(task.machine_id, self.pool.clone())
            .await?
            .ok_or(RunError::MachineNotFound(task.machine_id))?;
        let inputs =
            drift::resolve_parameters(&machine, &task.input_parameters).map_err(RunError::Inputs)?;

        let adapters = self.adapters.clone();
        let source = task.file_path.clone();
        let args = inputs.clone();
        let outcome = tokio::task::spawn_blocking(move || adapters.execute(&source, &args)).await??;

        let code_values = drift::extract_outputs(&outcome.stdout, &task.output_parameters)?;

        // The program may have run for minutes; compare against current values
        let machine = db::get_machine(task.machine_id, self.pool.clone())
            .await?
            .ok_or(RunError::MachineNotFound(task.machine_id))?;
        let real_values = drift::resolve_parameters(&machine, &task.output_parameters)
            .map_err(RunError::RealValues)?;

        let status = drift::evaluate(
            &task.output_parameters,
            &real_values,
            &code_values,
            &task.output_parameters_error_rate,
            self.policy,
        )?;

        let mut log = TaskLog {
            task_log_id: 0,
            task_id: task.task_id,
            input_parameter_names: task.input_parameters.clone(),
            input_parameter_values: inputs,
            output_parameter_names: task.output_parameters.clone(),
            output_parameter_real_values: real_values,
            output_parameter_code_values: code_values,
            status,
            created_at: now,
        };
        log.task_log_id = db::insert_task_log(&log, self.pool.clone()).await?;

        // The log is already written, so a failed update does not drop the run
        if let Err(e) = db::update_task_last_run(task.task_id, now, self.pool.clone()).await {
            log::warn!("Failed to update last run of task {}: {e}", task.task_id);
        }

        Ok(log)
    }
}
