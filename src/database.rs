use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::models::{Machine, MachineId, Task, TaskId, TaskLog};

const DATABASE_NAME: &str = "twincheck.sqlite3";

pub fn get_db_path() -> PathBuf {
    let data_dir = crate::data_dir();
    fs::create_dir_all(&data_dir).expect("Failed to create local data dir");
    data_dir.join(DATABASE_NAME)
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    if let Some(parent) = db_path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    // rwc = read/write/create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .connect(&db_url)
        .await?;

    create_schema(&db_pool).await?;
    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

/// A private in-memory database; the single connection is never recycled
/// since that would drop its contents
pub async fn init_memory_db() -> sqlx::Result<SqlitePool> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&db_pool).await?;
    Ok(db_pool)
}

async fn create_schema(db_pool: &SqlitePool) -> sqlx::Result<()> {
    // PRAGMA statements cannot be run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;",
        "PRAGMA journal_mode = WAL;",
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS machines (
            id            INTEGER PRIMARY KEY,
            name          TEXT    NOT NULL,
            parameters    TEXT    NOT NULL
        );",
        r"
        CREATE TABLE IF NOT EXISTS tasks (
            id                  INTEGER  PRIMARY KEY,
            name                TEXT     NOT NULL,
            machine_id          INTEGER  NOT NULL,
            time_interval       TEXT     NOT NULL,
            start_time          TEXT     NOT NULL,
            end_time            TEXT     NOT NULL,
            input_parameters    TEXT     NOT NULL,
            output_parameters   TEXT     NOT NULL,
            output_error_rates  TEXT     NOT NULL,
            file_path           TEXT     NOT NULL,
            created_at          TEXT     NOT NULL,
            last_run            TEXT,
            FOREIGN KEY (machine_id)  REFERENCES machines (id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS task_logs (
            id                      INTEGER  PRIMARY KEY,
            task_id                 INTEGER  NOT NULL,
            input_parameter_names   TEXT     NOT NULL,
            input_parameter_values  TEXT     NOT NULL,
            output_parameter_names  TEXT     NOT NULL,
            output_real_values      TEXT     NOT NULL,
            output_code_values      TEXT     NOT NULL,
            status                  TEXT     NOT NULL,
            created_at              TEXT     NOT NULL,
            FOREIGN KEY (task_id)  REFERENCES tasks (id)
        );",
        "CREATE INDEX IF NOT EXISTS task_logs_by_task ON task_logs (task_id, id);",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // Remove WAL and SHM files (ignore errors as they might not exist)
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> sqlx::Result<String> {
    serde_json::to_string(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn from_json<T: DeserializeOwned>(text: &str) -> sqlx::Result<T> {
    serde_json::from_str(text).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn parse_time(text: &str) -> sqlx::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[derive(sqlx::FromRow)]
struct MachineRow {
    id: i64,
    name: String,
    parameters: String,
}

impl From<MachineRow> for Machine {
    fn from(row: MachineRow) -> Self {
        Machine {
            machine_id: row.id,
            name: row.name,
            parameters: row.parameters,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    name: String,
    machine_id: i64,
    time_interval: String,
    start_time: String,
    end_time: String,
    input_parameters: String,
    output_parameters: String,
    output_error_rates: String,
    file_path: String,
    created_at: String,
    last_run: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = sqlx::Error;

    fn try_from(row: TaskRow) -> sqlx::Result<Self> {
        Ok(Task {
            task_id: row.id,
            task_name: row.name,
            machine_id: row.machine_id,
            time_interval: row.time_interval,
            start_time: parse_time(&row.start_time)?,
            end_time: parse_time(&row.end_time)?,
            input_parameters: from_json(&row.input_parameters)?,
            output_parameters: from_json(&row.output_parameters)?,
            output_parameters_error_rate: from_json(&row.output_error_rates)?,
            file_path: PathBuf::from(row.file_path),
            created_at: parse_time(&row.created_at)?,
            last_run: row.last_run.as_deref().map(parse_time).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskLogRow {
    id: i64,
    task_id: i64,
    input_parameter_names: String,
    input_parameter_values: String,
    output_parameter_names: String,
    output_real_values: String,
    output_code_values: String,
    status: String,
    created_at: String,
}

impl TryFrom<TaskLogRow> for TaskLog {
    type Error = sqlx::Error;

    fn try_from(row: TaskLogRow) -> sqlx::Result<Self> {
        Ok(TaskLog {
            task_log_id: row.id,
            task_id: row.task_id,
            input_parameter_names: from_json(&row.input_parameter_names)?,
            input_parameter_values: from_json(&row.input_parameter_values)?,
            output_parameter_names: from_json(&row.output_parameter_names)?,
            output_parameter_real_values: from_json(&row.output_real_values)?,
            output_parameter_code_values: from_json(&row.output_code_values)?,
            status: from_json(&row.status)?,
            created_at: parse_time(&row.created_at)?,
        })
    }
}

pub async fn insert_machine(
    name: &str,
    parameters: &str,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<Machine> {
    let id = sqlx::query("INSERT INTO machines (name, parameters) VALUES (?, ?)")
        .bind(name)
        .bind(parameters)
        .execute(pool.as_ref())
        .await?
        .last_insert_rowid();

    Ok(Machine {
        machine_id: id,
        name: name.to_string(),
        parameters: parameters.to_string(),
    })
}

/// `Ok(None)` when no machine has this id
pub async fn get_machine(id: MachineId, pool: Arc<SqlitePool>) -> sqlx::Result<Option<Machine>> {
    let row = sqlx::query_as::<_, MachineRow>(
        "SELECT id, name, parameters FROM machines WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await?;

    Ok(row.map(Machine::from))
}

pub async fn list_machines(pool: Arc<SqlitePool>) -> sqlx::Result<Vec<Machine>> {
    let rows =
        sqlx::query_as::<_, MachineRow>("SELECT id, name, parameters FROM machines ORDER BY id")
            .fetch_all(pool.as_ref())
            .await?;

    Ok(rows.into_iter().map(Machine::from).collect())
}

/// Stores everything but `task_id`, which the database assigns
pub async fn insert_task(task: &Task, pool: Arc<SqlitePool>) -> sqlx::Result<TaskId> {
    let result = sqlx::query(
        r#"
        INSERT INTO tasks (name, machine_id, time_interval, start_time, end_time, input_parameters,
                           output_parameters, output_error_rates, file_path, created_at, last_run)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&task.task_name)
    .bind(task.machine_id)
    .bind(&task.time_interval)
    .bind(crate::format_timestamp(&task.start_time))
    .bind(crate::format_timestamp(&task.end_time))
    .bind(to_json(&task.input_parameters)?)
    .bind(to_json(&task.output_parameters)?)
    .bind(to_json(&task.output_parameters_error_rate)?)
    .bind(task.file_path.to_string_lossy().into_owned())
    .bind(crate::format_timestamp(&task.created_at))
    .bind(task.last_run.as_ref().map(crate::format_timestamp))
    .execute(pool.as_ref())
    .await?;

    Ok(result.last_insert_rowid())
}

const TASK_COLUMNS: &str = "id, name, machine_id, time_interval, start_time, end_time, \
     input_parameters, output_parameters, output_error_rates, file_path, created_at, last_run";

pub async fn get_task(id: TaskId, pool: Arc<SqlitePool>) -> sqlx::Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(id)
        .fetch_optional(pool.as_ref())
        .await?;

    row.map(Task::try_from).transpose()
}

pub async fn list_tasks(pool: Arc<SqlitePool>) -> sqlx::Result<Vec<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id");
    let rows = sqlx::query_as::<_, TaskRow>(&sql)
        .fetch_all(pool.as_ref())
        .await?;

    rows.into_iter().map(Task::try_from).collect()
}

pub async fn update_task_last_run(
    id: TaskId,
    time: DateTime<Utc>,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE tasks SET last_run = ? WHERE id = ?")
        .bind(crate::format_timestamp(&time))
        .bind(id)
        .execute(pool.as_ref())
        .await?;
    Ok(())
}

/// Appends a log and returns its id
pub async fn insert_task_log(log: &TaskLog, pool: Arc<SqlitePool>) -> sqlx::Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO task_logs (task_id, input_parameter_names, input_parameter_values,
                               output_parameter_names, output_real_values, output_code_values,
                               status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(log.task_id)
    .bind(to_json(&log.input_parameter_names)?)
    .bind(to_json(&log.input_parameter_values)?)
    .bind(to_json(&log.output_parameter_names)?)
    .bind(to_json(&log.output_parameter_real_values)?)
    .bind(to_json(&log.output_parameter_code_values)?)
    .bind(to_json(&log.status)?)
    .bind(crate::format_timestamp(&log.created_at))
    .execute(pool.as_ref())
    .await?;

    Ok(result.last_insert_rowid())
}

/// Logs of one task, oldest first
pub async fn list_task_logs(task_id: TaskId, pool: Arc<SqlitePool>) -> sqlx::Result<Vec<TaskLog>> {
    let rows = sqlx::query_as::<_, TaskLogRow>(
        r#"
        SELECT id, task_id, input_parameter_names, input_parameter_values, output_parameter_names,
               output_real_values, output_code_values, status, created_at
        FROM task_logs
        WHERE task_id = ?
        ORDER BY id
        "#,
    )
    .bind(task_id)
    .fetch_all(pool.as_ref())
    .await?;

    rows.into_iter().map(TaskLog::try_from).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_task(machine_id: MachineId) -> Task {
        let start = Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).unwrap();
        Task {
            task_id: 0,
            task_name: "press line".to_string(),
            machine_id,
            time_interval: "0 */30 * * * *".to_string(),
            start_time: start,
            end_time: start + Duration::days(7),
            input_parameters: vec!["x".to_string()],
            output_parameters: vec!["y".to_string(), "z".to_string()],
            output_parameters_error_rate: vec![5, 10],
            file_path: PathBuf::from("uploads/abc.py"),
            created_at: start - Duration::days(1),
            last_run: None,
        }
    }

    #[tokio::test]
    async fn test_machine_round_trip() {
        let pool = Arc::new(init_memory_db().await.unwrap());
        let machine = insert_machine("press", r#"{"x":"10"}"#, pool.clone()).await.unwrap();

        let fetched = get_machine(machine.machine_id, pool.clone()).await.unwrap();
        assert_eq!(fetched, Some(machine.clone()));
        assert_eq!(get_machine(machine.machine_id + 1, pool.clone()).await.unwrap(), None);
        assert_eq!(list_machines(pool).await.unwrap(), vec![machine]);
    }

    #[tokio::test]
    async fn test_task_and_logs() {
        let pool = Arc::new(init_memory_db().await.unwrap());
        let machine = insert_machine("press", "{}", pool.clone()).await.unwrap();

        let mut task = sample_task(machine.machine_id);
        task.task_id = insert_task(&task, pool.clone()).await.unwrap();
        assert_eq!(get_task(task.task_id, pool.clone()).await.unwrap(), Some(task.clone()));

        let ran_at = task.start_time + Duration::minutes(30);
        update_task_last_run(task.task_id, ran_at, pool.clone()).await.unwrap();
        let stored = list_tasks(pool.clone()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].last_run, Some(ran_at));

        let mut log = TaskLog {
            task_log_id: 0,
            task_id: task.task_id,
            input_parameter_names: vec!["x".to_string()],
            input_parameter_values: vec!["10".to_string()],
            output_parameter_names: task.output_parameters.clone(),
            output_parameter_real_values: vec!["20".to_string(), "3".to_string()],
            output_parameter_code_values: vec!["20.4".to_string(), "9".to_string()],
            status: vec![true, false],
            created_at: ran_at,
        };
        log.task_log_id = insert_task_log(&log, pool.clone()).await.unwrap();

        assert_eq!(list_task_logs(task.task_id, pool.clone()).await.unwrap(), vec![log]);
        assert!(list_task_logs(task.task_id + 1, pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_task_requires_existing_machine() {
        let pool = Arc::new(init_memory_db().await.unwrap());
        assert!(insert_task(&sample_task(42), pool).await.is_err());
    }
}
