#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use twincheck::adapters::AdapterRegistry;
use twincheck::config::SandboxConfig;
use twincheck::database as db;
use twincheck::drift::ZeroExpectedPolicy;
use twincheck::models::{Machine, Task};
use twincheck::runner::TaskRunner;
use twincheck::sandbox::{ContainerOutput, ContainerRun, ContainerRuntime, SandboxError};

/// Container engine stand-in: syntax checks pass, program runs print `stdout`
#[derive(Default)]
pub struct FakeRuntime {
    stdout: Mutex<String>,
    calls: Mutex<Vec<ContainerRun>>,
}

impl FakeRuntime {
    pub fn printing(stdout: &str) -> Arc<Self> {
        let runtime = Self::default();
        *runtime.stdout.lock() = stdout.to_string();
        Arc::new(runtime)
    }

    pub fn set_stdout(&self, stdout: &str) {
        *self.stdout.lock() = stdout.to_string();
    }

    pub fn calls(&self) -> Vec<ContainerRun> {
        self.calls.lock().clone()
    }
}

impl ContainerRuntime for FakeRuntime {
    fn run(&self, spec: &ContainerRun) -> Result<ContainerOutput, SandboxError> {
        self.calls.lock().push(spec.clone());

        let is_syntax_check = spec.command.iter().any(|part| part == "py_compile");
        Ok(ContainerOutput {
            stdout: if is_syntax_check {
                String::new()
            } else {
                self.stdout.lock().clone()
            },
            stderr: String::new(),
            exit_code: 0,
        })
    }
}

/// Everything a runner needs, backed by an in-memory database
pub struct Harness {
    pub pool: Arc<SqlitePool>,
    pub runtime: Arc<FakeRuntime>,
    pub runner: Arc<TaskRunner>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new(stdout: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(db::init_memory_db().await.unwrap());
        let runtime = FakeRuntime::printing(stdout);

        let config = SandboxConfig {
            workspace_root: Some(dir.path().join("workspaces")),
            ..SandboxConfig::default()
        };
        let adapters = Arc::new(AdapterRegistry::new(runtime.clone(), &config));
        let runner = Arc::new(TaskRunner::new(
            pool.clone(),
            adapters,
            ZeroExpectedPolicy::Legacy,
        ));

        Self {
            pool,
            runtime,
            runner,
            dir,
        }
    }

    pub fn uploads_root(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub async fn machine(&self, parameters: &str) -> Machine {
        db::insert_machine("press", parameters, self.pool.clone())
            .await
            .unwrap()
    }

    pub fn program(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Stores a task running `source` and returns it with its id
    pub async fn task(&self, machine: &Machine, source: &Path) -> Task {
        let mut task = task_for(machine.machine_id, source);
        task.task_id = db::insert_task(&task, self.pool.clone()).await.unwrap();
        task
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).unwrap()
}

/// Every 30 minutes over one day starting at [`start`], x in, y out at 5%
pub fn task_for(machine_id: i64, source: &Path) -> Task {
    Task {
        task_id: 0,
        task_name: "press-twin".to_string(),
        machine_id,
        time_interval: "0 */30 * * * *".to_string(),
        start_time: start(),
        end_time: start() + Duration::days(1),
        input_parameters: vec!["x".to_string()],
        output_parameters: vec!["y".to_string()],
        output_parameters_error_rate: vec![5],
        file_path: source.to_path_buf(),
        created_at: start() - Duration::days(1),
        last_run: None,
    }
}

pub const TWIN_PY: &str = "import sys\nprint(f'y={float(sys.argv[1]) * 2.04}')\n";
