use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::ServerConfig;
use crate::routes::{
    get_machine_handler, get_machines_handler, get_task_handler, get_tasks_handler,
    json_error_handler, path_error_handler, post_machine_handler, post_task_handler,
    scheduler_stats_handler,
};
use crate::scheduler::Scheduler;
use crate::uploads::UploadDir;

/// Registers every endpoint under `/api/v1`. The app must carry
/// `Data<SqlitePool>`, `Data<Scheduler>` and `Data<UploadDir>`.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .app_data(web::PathConfig::default().error_handler(path_error_handler))
        .service(
            web::scope("/api/v1")
                .service(get_machines_handler)
                .service(get_machine_handler)
                .service(post_machine_handler)
                .service(get_tasks_handler)
                .service(get_task_handler)
                .service(post_task_handler)
                .service(scheduler_stats_handler),
        );
}

pub fn build_server(
    server_config: ServerConfig,
    db_pool: Arc<SqlitePool>,
    scheduler: Arc<Scheduler>,
    uploads: Arc<UploadDir>,
) -> std::io::Result<Server> {
    let db_pool = web::Data::from(db_pool);
    let scheduler = web::Data::from(scheduler);
    let uploads = web::Data::from(uploads);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(db_pool.clone())
            .app_data(scheduler.clone())
            .app_data(uploads.clone())
            .wrap(middleware::Logger::default())
            .configure(configure_api)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(8080),
    ))?
    .run();

    Ok(server)
}
