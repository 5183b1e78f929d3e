use std::sync::Arc;

use clap::Parser;

use twincheck::adapters::AdapterRegistry;
use twincheck::config::{CliArgs, Config};
use twincheck::database as db;
use twincheck::runner::TaskRunner;
use twincheck::sandbox::DockerRuntime;
use twincheck::scheduler::Scheduler;
use twincheck::uploads::UploadDir;
use twincheck::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        database: database_config,
        uploads: uploads_config,
        sandbox: sandbox_config,
        drift: drift_config,
    } = cli.to_config().expect("Failed to load configuration");

    let db_path = database_config.path.unwrap_or_else(db::get_db_path);
    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = Arc::new(
        db::init_db(&db_path)
            .await
            .expect("Failed to initialize database"),
    );

    let docker = DockerRuntime::new(
        sandbox_config.docker_binary.clone(),
        tokio::runtime::Handle::current(),
    );
    match docker.server_version().await {
        Ok(version) => log::info!("Using container engine {version}"),
        Err(e) => log::warn!("Container engine unavailable, executions will fail: {e}"),
    }

    let adapters = Arc::new(AdapterRegistry::new(Arc::new(docker), &sandbox_config));
    let runner = Arc::new(TaskRunner::new(
        db_pool.clone(),
        adapters,
        drift_config.zero_expected,
    ));
    let scheduler = Arc::new(Scheduler::new(runner));

    let uploads = Arc::new(
        UploadDir::new(uploads_config.dir.unwrap_or_else(UploadDir::default_root))
            .expect("Failed to create upload directory"),
    );

    // ======= PREPARATION END, EXECUTION START =======

    scheduler
        .recover(db_pool.clone())
        .await
        .expect("Failed to load persisted tasks");

    let server = build_server(server_config, db_pool, scheduler.clone(), uploads)
        .expect("Failed to build server");

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // 1. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    // 2. Stop every trigger; in-flight executions finish on their own
    scheduler.shutdown().await;

    log::info!("Shutdown complete");
    Ok(())
}
