use actix_web::{HttpResponse, Responder, get, post, web};
use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use super::ErrorResponse;
use crate::adapters::ExecError;
use crate::creation::{self, CreateTaskError, NewTask};
use crate::database as db;
use crate::models::TaskId;
use crate::reports::{TaskDetail, TaskSummary};
use crate::scheduler::Scheduler;
use crate::uploads::UploadDir;

#[get("/tasks")]
pub async fn get_tasks_handler(pool: web::Data<SqlitePool>) -> impl Responder {
    match db::list_tasks(pool.into_inner()).await {
        Ok(tasks) => {
            let now = Utc::now();
            let summaries: Vec<TaskSummary> =
                tasks.iter().map(|task| TaskSummary::new(task, now)).collect();
            HttpResponse::Ok().json(summaries)
        }
        Err(e) => {
            log::error!("Failed to retrieve tasks: {e}");
            ErrorResponse::external("Failed to retrieve tasks.")
        }
    }
}

#[get("/tasks/{id}")]
pub async fn get_task_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<(TaskId,)>,
) -> impl Responder {
    let task_id = path.into_inner().0;
    let pool = pool.into_inner();

    let task = match db::get_task(task_id, pool.clone()).await {
        Ok(Some(task)) => task,
        Ok(None) => return ErrorResponse::not_found(format!("Task {task_id} not found.")),
        Err(e) => {
            log::error!("Failed to retrieve task {task_id}: {e}");
            return ErrorResponse::external("Failed to retrieve task details.");
        }
    };

    match db::list_task_logs(task_id, pool).await {
        Ok(logs) => HttpResponse::Ok().json(TaskDetail::new(&task, &logs, Utc::now())),
        Err(e) => {
            log::error!("Failed to retrieve logs of task {task_id}: {e}");
            ErrorResponse::external("Failed to retrieve task details.")
        }
    }
}

#[post("/tasks")]
pub async fn post_task_handler(
    scheduler: web::Data<Scheduler>,
    uploads: web::Data<UploadDir>,
    body: web::Json<NewTask>,
) -> impl Responder {
    match creation::create_task(body.into_inner(), Utc::now(), &uploads, &scheduler).await {
        Ok(task) => HttpResponse::Ok().json(task),
        Err(e) => {
            log::info!("Rejected new task: {e}");
            create_error_response(&e)
        }
    }
}

fn create_error_response(err: &CreateTaskError) -> HttpResponse {
    use CreateTaskError as E;

    match err {
        E::MachineNotFound(_) => ErrorResponse::not_found(err.to_string()),
        E::Execution(ExecError::Sandbox(_)) => ErrorResponse::external(err.to_string()),
        E::Database(_) => ErrorResponse::external("Failed to store task."),
        E::Upload(_) | E::Join(_) | E::Execution(ExecError::Staging(_)) => {
            log::error!("Task creation failed: {err}");
            ErrorResponse::internal("Failed to run uploaded program.")
        }
        E::InvalidInterval(_)
        | E::InvalidTime { .. }
        | E::StartNotInFuture
        | E::EndNotAfterStart
        | E::ToleranceMismatch { .. }
        | E::NegativeTolerance
        | E::UnsupportedExtension(_)
        | E::InvalidInputParameters(_)
        | E::InvalidOutputParameters(_)
        | E::Execution(_) => ErrorResponse::invalid_argument(err.to_string()),
    }
}
