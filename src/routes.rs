mod machines;
mod tasks;

pub use machines::{get_machine_handler, get_machines_handler, post_machine_handler};
pub use tasks::{get_task_handler, get_tasks_handler, post_task_handler};

use actix_web::error::{InternalError, JsonPayloadError, PathError};
use actix_web::{HttpRequest, HttpResponse, Responder, get, web};
use serde::Serialize;

use crate::scheduler::Scheduler;

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
    message: String,
}

impl ErrorResponse {
    fn invalid_argument(message: impl Into<String>) -> HttpResponse {
        HttpResponse::BadRequest().json(ErrorResponse {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: message.into(),
        })
    }

    fn not_found(message: impl Into<String>) -> HttpResponse {
        HttpResponse::NotFound().json(ErrorResponse {
            reason: "ERR_NOT_FOUND",
            code: 3,
            message: message.into(),
        })
    }

    fn external(message: impl Into<String>) -> HttpResponse {
        HttpResponse::InternalServerError().json(ErrorResponse {
            reason: "ERR_EXTERNAL",
            code: 5,
            message: message.into(),
        })
    }

    fn internal(message: impl Into<String>) -> HttpResponse {
        HttpResponse::InternalServerError().json(ErrorResponse {
            reason: "ERR_INTERNAL",
            code: 6,
            message: message.into(),
        })
    }
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = ErrorResponse::invalid_argument(err.to_string());
    InternalError::from_response(err, response).into()
}

pub fn path_error_handler(err: PathError, _req: &HttpRequest) -> actix_web::Error {
    let response = ErrorResponse::invalid_argument(err.to_string());
    InternalError::from_response(err, response).into()
}

#[derive(Serialize)]
struct SchedulerStats {
    registered: Vec<i64>,
    #[serde(flatten)]
    counters: crate::runner::CounterSnapshot,
}

/// Expected vs. actual runs, for operators watching for dropped executions
#[get("/scheduler/stats")]
pub async fn scheduler_stats_handler(scheduler: web::Data<Scheduler>) -> impl Responder {
    HttpResponse::Ok().json(SchedulerStats {
        registered: scheduler.registered(),
        counters: scheduler.runner().counters(),
    })
}
