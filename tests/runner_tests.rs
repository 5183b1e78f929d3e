mod common;

use chrono::Duration;
use pretty_assertions::assert_eq;

use twincheck::adapters::ExecError;
use twincheck::database as db;
use twincheck::gate::GateRejection;
use twincheck::runner::{CounterSnapshot, RunError, RunOutcome};

use common::{Harness, TWIN_PY, start};

#[tokio::test]
async fn test_run_within_tolerance_is_logged() {
    let h = Harness::new("y=20.4\n").await;
    let machine = h.machine(r#"{"x": "10", "y": "20"}"#).await;
    let task = h.task(&machine, &h.program("twin.py", TWIN_PY)).await;

    let fired = start() + Duration::minutes(30);
    let RunOutcome::Logged(log) = h.runner.run(&task, fired).await else {
        panic!("run was not logged");
    };

    assert_eq!(log.input_parameter_values, vec!["10"]);
    assert_eq!(log.output_parameter_real_values, vec!["20"]);
    assert_eq!(log.output_parameter_code_values, vec!["20.4"]);
    assert_eq!(log.status, vec![true]);
    assert_eq!(log.created_at, fired);

    let stored = db::list_task_logs(task.task_id, h.pool.clone()).await.unwrap();
    assert_eq!(stored, vec![log]);

    let task = db::get_task(task.task_id, h.pool.clone()).await.unwrap().unwrap();
    assert_eq!(task.last_run, Some(fired));

    // Syntax check, then the program with the resolved input
    let calls = h.runtime.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].command, vec!["python", "-u", "script.py", "10"]);
}

#[tokio::test]
async fn test_drifted_run_is_still_logged() {
    let h = Harness::new("y=20.4\n").await;
    let machine = h.machine(r#"{"x": 10, "y": 30}"#).await;
    let task = h.task(&machine, &h.program("twin.py", TWIN_PY)).await;

    let RunOutcome::Logged(log) = h.runner.run(&task, start()).await else {
        panic!("run was not logged");
    };
    assert_eq!(log.status, vec![false]);
    assert_eq!(log.output_parameter_real_values, vec!["30"]);

    let stored = db::list_task_logs(task.task_id, h.pool.clone()).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_gate_rejection_drops_run_without_container() {
    let h = Harness::new("y=20.4\n").await;
    let machine = h.machine(r#"{"x": "10", "y": "20"}"#).await;
    let body = "for (int i = 0; i < 2; ++i) {}\n".repeat(25);
    let source = h.program("twin.cpp", &format!("int main() {{\n{body}}}\n"));
    let task = h.task(&machine, &source).await;

    let outcome = h.runner.run(&task, start()).await;
    let RunOutcome::Dropped(err) = outcome else {
        panic!("expected a dropped run, got {outcome:?}");
    };
    assert!(matches!(
        err,
        RunError::Exec(ExecError::Gate(GateRejection::BigLoop { count: 25 }))
    ));
    assert_eq!(err.stage(), "safety gate");

    assert!(h.runtime.calls().is_empty());
    assert!(db::list_task_logs(task.task_id, h.pool.clone()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_outside_window_is_skipped() {
    let h = Harness::new("y=20.4\n").await;
    let machine = h.machine(r#"{"x": "10", "y": "20"}"#).await;
    let task = h.task(&machine, &h.program("twin.py", TWIN_PY)).await;

    for fired in [start() - Duration::minutes(30), task.end_time + Duration::minutes(30)] {
        assert!(matches!(h.runner.run(&task, fired).await, RunOutcome::Skipped));
    }
    // Both bounds belong to the window
    assert!(matches!(h.runner.run(&task, task.end_time).await, RunOutcome::Logged(_)));

    assert_eq!(db::list_task_logs(task.task_id, h.pool.clone()).await.unwrap().len(), 1);
    assert_eq!(h.runtime.calls().len(), 2);
}

#[tokio::test]
async fn test_failures_leave_no_log() {
    let h = Harness::new("z=1\n").await;
    let machine = h.machine(r#"{"x": "10", "y": "20"}"#).await;
    let task = h.task(&machine, &h.program("twin.py", TWIN_PY)).await;

    // Program output lacks y
    let outcome = h.runner.run(&task, start()).await;
    assert!(matches!(outcome, RunOutcome::Dropped(RunError::Extraction(_))));

    // Machine has no x to feed the program
    let bare = h.machine(r#"{"y": "20"}"#).await;
    let orphan_inputs = h.task(&bare, &task.file_path).await;
    let outcome = h.runner.run(&orphan_inputs, start()).await;
    assert!(matches!(outcome, RunOutcome::Dropped(RunError::Inputs(_))));

    // Machine missing altogether
    let mut unknown = task.clone();
    unknown.machine_id = 999;
    let outcome = h.runner.run(&unknown, start()).await;
    assert!(matches!(outcome, RunOutcome::Dropped(RunError::MachineNotFound(999))));

    // Non-numeric program output
    h.runtime.set_stdout("y=fast\n");
    let outcome = h.runner.run(&task, start()).await;
    assert!(matches!(outcome, RunOutcome::Dropped(RunError::Drift(_))));

    for id in [task.task_id, orphan_inputs.task_id] {
        assert!(db::list_task_logs(id, h.pool.clone()).await.unwrap().is_empty());
    }
    assert_eq!(
        h.runner.counters(),
        CounterSnapshot {
            logged: 0,
            skipped: 0,
            dropped: 4,
        }
    );
}

#[tokio::test]
async fn test_counters_track_every_outcome() {
    let h = Harness::new("y=20.4\n").await;
    let machine = h.machine(r#"{"x": "10", "y": "20"}"#).await;
    let task = h.task(&machine, &h.program("twin.py", TWIN_PY)).await;

    h.runner.run(&task, start()).await;
    h.runner.run(&task, start() + Duration::minutes(30)).await;
    h.runner.run(&task, start() - Duration::minutes(30)).await;

    let mut broken = task.clone();
    broken.output_parameters = vec!["missing".to_string()];
    h.runner.run(&broken, start()).await;

    assert_eq!(
        h.runner.counters(),
        CounterSnapshot {
            logged: 2,
            skipped: 1,
            dropped: 1,
        }
    );
}
