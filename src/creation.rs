//! Validating, test-running, storing and registering a new task.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;

use crate::adapters::ExecError;
use crate::database as db;
use crate::drift::{self, ExtractionError, ResolveError};
use crate::language::Language;
use crate::models::{MachineId, Task};
use crate::schedule::{self, ScheduleError};
use crate::scheduler::Scheduler;
use crate::uploads::UploadDir;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub task_name: String,
    pub machine_id: MachineId,
    /// Interval in minutes
    pub time_interval: i64,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub input_parameters: Vec<String>,
    pub output_parameters: Vec<String>,
    pub output_parameters_error_rate: Vec<i64>,
    pub file_name: String,
    pub source_code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateTaskError {
    #[error(transparent)]
    InvalidInterval(#[from] ScheduleError),

    #[error("invalid {field}: {reason}")]
    InvalidTime { field: &'static str, reason: String },

    #[error("startTime must be in the future")]
    StartNotInFuture,

    #[error("endTime must be after startTime")]
    EndNotAfterStart,

    #[error("{outputs} outputParameters but {tolerances} outputParametersErrorRate values")]
    ToleranceMismatch { outputs: usize, tolerances: usize },

    #[error("outputParametersErrorRate must not be negative")]
    NegativeTolerance,

    #[error("unsupported file type: {0}")]
    UnsupportedExtension(String),

    #[error("machine {0} not found")]
    MachineNotFound(MachineId),

    #[error("invalid inputParameters: {0}")]
    InvalidInputParameters(#[source] ResolveError),

    #[error("failed to store upload: {0}")]
    Upload(#[source] std::io::Error),

    #[error(transparent)]
    Execution(#[from] ExecError),

    #[error("execution task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid outputParameters: {0}")]
    InvalidOutputParameters(#[from] ExtractionError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn parse_time(field: &'static str, value: &str) -> Result<DateTime<Utc>, CreateTaskError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc).trunc_subsecs(3))
        .map_err(|e| CreateTaskError::InvalidTime {
            field,
            reason: e.to_string(),
        })
}

/// Everything that can be checked without touching the database or sandbox
fn validate(
    request: &NewTask,
    now: DateTime<Utc>,
) -> Result<(String, DateTime<Utc>, DateTime<Utc>), CreateTaskError> {
    let schedule = schedule::interval_to_schedule(request.time_interval)?;
    let start_time = parse_time("startTime", &request.start_time)?;
    let end_time = parse_time("endTime", &request.end_time)?;

    if start_time <= now {
        return Err(CreateTaskError::StartNotInFuture);
    }
    if end_time <= start_time {
        return Err(CreateTaskError::EndNotAfterStart);
    }

    let (outputs, tolerances) = (
        request.output_parameters.len(),
        request.output_parameters_error_rate.len(),
    );
    if outputs != tolerances {
        return Err(CreateTaskError::ToleranceMismatch { outputs, tolerances });
    }
    if request.output_parameters_error_rate.iter().any(|rate| *rate < 0) {
        return Err(CreateTaskError::NegativeTolerance);
    }

    if Language::from_path(Path::new(&request.file_name)).is_none() {
        let ext = Path::new(&request.file_name)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(CreateTaskError::UnsupportedExtension(ext));
    }

    Ok((schedule.to_string(), start_time, end_time))
}

/// Creates a task the way the API does: validate, store the program, run it
/// once through the gate and sandbox, check its outputs, persist, register.
/// The stored program is removed again if any later step fails.
pub async fn create_task(
    request: NewTask,
    now: DateTime<Utc>,
    uploads: &UploadDir,
    scheduler: &Scheduler,
) -> Result<Task, CreateTaskError> {
    let (time_interval, start_time, end_time) = validate(&request, now)?;

    let pool = scheduler.runner().pool();
    let machine = db::get_machine(request.machine_id, pool)
        .await?
        .ok_or(CreateTaskError::MachineNotFound(request.machine_id))?;
    let inputs = drift::resolve_parameters(&machine, &request.input_parameters)
        .map_err(CreateTaskError::InvalidInputParameters)?;

    let file_path = uploads
        .save(&request.file_name, &request.source_code)
        .map_err(CreateTaskError::Upload)?;

    let task = Task {
        task_id: 0,
        task_name: request.task_name,
        machine_id: request.machine_id,
        time_interval,
        start_time,
        end_time,
        input_parameters: request.input_parameters,
        output_parameters: request.output_parameters,
        output_parameters_error_rate: request.output_parameters_error_rate,
        file_path: file_path.clone(),
        created_at: now.trunc_subsecs(3),
        last_run: None,
    };

    match trial_run_and_store(task, inputs, scheduler).await {
        Ok(task) => {
            log::info!("Created task {} ({})", task.task_id, task.task_name);
            Ok(task)
        }
        Err(e) => {
            uploads.remove(&file_path);
            Err(e)
        }
    }
}

async fn trial_run_and_store(
    mut task: Task,
    inputs: Vec<String>,
    scheduler: &Scheduler,
) -> Result<Task, CreateTaskError> {
    let runner = scheduler.runner();
    let adapters = runner.adapters();
    let source: PathBuf = task.file_path.clone();
    let outcome = tokio::task::spawn_blocking(move || adapters.execute(&source, &inputs)).await??;

    drift::extract_outputs(&outcome.stdout, &task.output_parameters)?;

    task.task_id = db::insert_task(&task, runner.pool()).await?;
    scheduler.register_task(task.clone())?;
    Ok(task)
}
