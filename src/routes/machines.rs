use actix_web::{HttpResponse, Responder, get, post, web};
use serde::Deserialize;
use sqlx::sqlite::SqlitePool;

use super::ErrorResponse;
use crate::database as db;
use crate::models::MachineId;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewMachine {
    pub name: String,
    /// Flat object of parameter name to current value
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

#[get("/machines")]
pub async fn get_machines_handler(pool: web::Data<SqlitePool>) -> impl Responder {
    match db::list_machines(pool.into_inner()).await {
        Ok(machines) => HttpResponse::Ok().json(machines),
        Err(e) => {
            log::error!("Failed to retrieve machines: {e}");
            ErrorResponse::external("Failed to retrieve machines.")
        }
    }
}

#[get("/machines/{id}")]
pub async fn get_machine_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<(MachineId,)>,
) -> impl Responder {
    let machine_id = path.into_inner().0;

    match db::get_machine(machine_id, pool.into_inner()).await {
        Ok(Some(machine)) => HttpResponse::Ok().json(machine),
        Ok(None) => ErrorResponse::not_found(format!("Machine {machine_id} not found.")),
        Err(e) => {
            log::error!("Failed to retrieve machine {machine_id}: {e}");
            ErrorResponse::external("Failed to retrieve machine.")
        }
    }
}

#[post("/machines")]
pub async fn post_machine_handler(
    pool: web::Data<SqlitePool>,
    body: web::Json<NewMachine>,
) -> impl Responder {
    let NewMachine { name, parameters } = body.into_inner();
    if name.trim().is_empty() {
        return ErrorResponse::invalid_argument("Machine name must not be empty.");
    }

    let parameters = serde_json::Value::Object(parameters).to_string();
    match db::insert_machine(&name, &parameters, pool.into_inner()).await {
        Ok(machine) => {
            log::info!("Inserted machine {} ({name})", machine.machine_id);
            HttpResponse::Ok().json(machine)
        }
        Err(e) => {
            log::error!("Failed to insert machine: {e}");
            ErrorResponse::external("Failed to store machine.")
        }
    }
}
