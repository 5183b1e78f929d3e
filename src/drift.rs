//! Output extraction and drift evaluation.
//!
//! Programs report results as `name=value` tokens on stdout. Each value is
//! compared against the machine's current value for the same parameter and
//! passes when the relative deviation stays within the task's tolerance.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Machine, TaskLog};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("machine parameters are not a JSON object: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("key not found: {0}")]
    MissingKey(String),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("key not found: {0}")]
    MissingKey(String),
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DriftError {
    #[error("expected {expected} values for {what}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("value {value:?} of {name} is not numeric")]
    NotNumeric { name: String, value: String },
}

/// How a zero expected value is judged
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ZeroExpectedPolicy {
    /// Pass iff the actual value is non-zero. Matches existing task logs.
    #[default]
    Legacy,
    /// Pass iff the actual value is zero as well
    RequireZero,
}

impl ZeroExpectedPolicy {
    pub fn is_within_tolerance(self, expected: f64, actual: f64, tolerance_percent: i64) -> bool {
        if expected == 0.0 {
            return match self {
                ZeroExpectedPolicy::Legacy => actual != 0.0,
                ZeroExpectedPolicy::RequireZero => actual == 0.0,
            };
        }
        deviation_percent(expected, actual) <= tolerance_percent as f64
    }
}

/// Tolerance check with the legacy zero rule
pub fn is_within_tolerance(expected: f64, actual: f64, tolerance_percent: i64) -> bool {
    ZeroExpectedPolicy::Legacy.is_within_tolerance(expected, actual, tolerance_percent)
}

/// `|actual - expected| / |expected| * 100`, undefined for a zero `expected`
fn deviation_percent(expected: f64, actual: f64) -> f64 {
    (actual - expected).abs() / expected.abs() * 100.0
}

/// Finds `name = value` for every name, in order. Fails without a partial
/// result if any name is absent.
pub fn extract_outputs(stdout: &str, names: &[String]) -> Result<Vec<String>, ExtractionError> {
    names
        .iter()
        .map(|name| {
            extract_one(stdout, name).ok_or_else(|| ExtractionError::MissingKey(name.clone()))
        })
        .collect()
}

fn extract_one(stdout: &str, name: &str) -> Option<String> {
    let pattern = format!(r"\b{}\s*=\s*([^,\s]+)", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    let captured = re.captures(stdout)?.get(1)?.as_str();

    // A sentence-ending period is not part of the value
    let value = captured.trim_end_matches('.');
    (!value.is_empty()).then(|| value.to_string())
}

/// Looks up each name in the machine's parameter document, in order
pub fn resolve_parameters(
    machine: &Machine,
    names: &[String],
) -> Result<Vec<String>, ResolveError> {
    let document: serde_json::Map<String, Value> = serde_json::from_str(&machine.parameters)?;

    names
        .iter()
        .map(|name| {
            document
                .get(name)
                .map(format_value)
                .ok_or_else(|| ResolveError::MissingKey(name.clone()))
        })
        .collect()
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_value(name: &str, value: &str) -> Result<f64, DriftError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| DriftError::NotNumeric {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// Per-output pass/fail. `expected` are the machine's values, `actual` the
/// program's.
pub fn evaluate(
    names: &[String],
    expected: &[String],
    actual: &[String],
    tolerances: &[i64],
    policy: ZeroExpectedPolicy,
) -> Result<Vec<bool>, DriftError> {
    for (what, len) in [
        ("machine values", expected.len()),
        ("program values", actual.len()),
        ("tolerances", tolerances.len()),
    ] {
        if len != names.len() {
            return Err(DriftError::LengthMismatch {
                what,
                expected: names.len(),
                actual: len,
            });
        }
    }

    names
        .iter()
        .zip(expected.iter().zip(actual))
        .zip(tolerances)
        .map(|((name, (expected, actual)), &tolerance)| {
            let expected = parse_value(name, expected)?;
            let actual = parse_value(name, actual)?;
            Ok(policy.is_within_tolerance(expected, actual, tolerance))
        })
        .collect()
}

/// Mean deviation over every comparable output of every log. Comparisons
/// with a zero or non-numeric expected value are left out.
pub fn aggregate_error_percentage(history: &[TaskLog]) -> f64 {
    let deviations: Vec<f64> = history
        .iter()
        .flat_map(|log| {
            log.output_parameter_real_values
                .iter()
                .zip(&log.output_parameter_code_values)
        })
        .filter_map(|(expected, actual)| {
            let expected = expected.trim().parse::<f64>().ok()?;
            let actual = actual.trim().parse::<f64>().ok()?;
            (expected != 0.0).then(|| deviation_percent(expected, actual))
        })
        .collect();

    if deviations.is_empty() {
        0.0
    } else {
        deviations.iter().sum::<f64>() / deviations.len() as f64
    }
}
