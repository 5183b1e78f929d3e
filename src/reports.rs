//! Read models served by the task endpoints.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::drift;
use crate::models::{MachineId, Task, TaskId, TaskLog};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub task_name: String,
    pub machine_id: MachineId,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub plugin_operating_hours: f64,
}

impl TaskSummary {
    pub fn new(task: &Task, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.task_id,
            task_name: task.task_name.clone(),
            machine_id: task.machine_id,
            created_at: task.created_at,
            is_active: task.start_time < now && now < task.end_time,
            plugin_operating_hours: operating_hours(task, now),
        }
    }
}

/// Hours from start to `now` (or to the end, once passed), never negative
fn operating_hours(task: &Task, now: DateTime<Utc>) -> f64 {
    let until = now.min(task.end_time);
    let seconds = (until - task.start_time).num_milliseconds() as f64 / 1000.0;
    (seconds / 3600.0).max(0.0)
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputParameter {
    pub parameter_name: String,
    pub parameter_value: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputParameter {
    pub parameter_name: String,
    pub parameter_machine_value: String,
    pub parameter_code_value: String,
    pub status: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunEntry {
    pub run_time: DateTime<Utc>,
    pub input_parameters: Vec<InputParameter>,
    pub output_parameters: Vec<OutputParameter>,
}

impl From<&TaskLog> for RunEntry {
    fn from(log: &TaskLog) -> Self {
        let input_parameters = log
            .input_parameter_names
            .iter()
            .zip(&log.input_parameter_values)
            .map(|(name, value)| InputParameter {
                parameter_name: name.clone(),
                parameter_value: value.clone(),
            })
            .collect();

        let output_parameters = log
            .output_parameter_names
            .iter()
            .zip(&log.output_parameter_real_values)
            .zip(&log.output_parameter_code_values)
            .zip(&log.status)
            .map(|(((name, machine), code), status)| OutputParameter {
                parameter_name: name.clone(),
                parameter_machine_value: machine.clone(),
                parameter_code_value: code.clone(),
                status: *status,
            })
            .collect();

        Self {
            run_time: log.created_at,
            input_parameters,
            output_parameters,
        }
    }
}

/// Configured tolerance of one output
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaximumErrorRate {
    pub parameter_name: String,
    pub error_rate: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(flatten)]
    pub summary: TaskSummary,
    pub data: Vec<RunEntry>,
    pub maximum_error_rates: Vec<MaximumErrorRate>,
    pub system_error_percentage: f64,
}

impl TaskDetail {
    pub fn new(task: &Task, logs: &[TaskLog], now: DateTime<Utc>) -> Self {
        Self {
            summary: TaskSummary::new(task, now),
            data: logs.iter().map(RunEntry::from).collect(),
            maximum_error_rates: task
                .output_parameters
                .iter()
                .zip(&task.output_parameters_error_rate)
                .map(|(name, rate)| MaximumErrorRate {
                    parameter_name: name.clone(),
                    error_rate: *rate,
                })
                .collect(),
            system_error_percentage: drift::aggregate_error_percentage(logs),
        }
    }
}
