use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type MachineId = i64;
pub type TaskId = i64;

/// A physical or simulated system exposing a flat JSON map of
/// parameter name to current value
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub machine_id: MachineId,
    pub name: String,
    /// Raw JSON object, e.g. `{"x": "10", "y": 20}`
    pub parameters: String,
}

/// A recurring validation job binding a machine, a program and a schedule
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: TaskId,
    pub task_name: String,
    pub machine_id: MachineId,
    /// Six-field cron expression, see [`crate::schedule::CronSpec`]
    pub time_interval: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub input_parameters: Vec<String>,
    pub output_parameters: Vec<String>,
    /// Per-output tolerance in percent, parallel to `output_parameters`
    pub output_parameters_error_rate: Vec<i64>,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

impl Task {
    /// Whether `now` lies inside the validity window, bounds included
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_time && now <= self.end_time
    }
}

/// One immutable execution record
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskLog {
    pub task_log_id: i64,
    pub task_id: TaskId,
    pub input_parameter_names: Vec<String>,
    pub input_parameter_values: Vec<String>,
    pub output_parameter_names: Vec<String>,
    /// Values observed on the machine at execution time
    pub output_parameter_real_values: Vec<String>,
    /// Values the program printed
    pub output_parameter_code_values: Vec<String>,
    pub status: Vec<bool>,
    pub created_at: DateTime<Utc>,
}
