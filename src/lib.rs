pub mod adapters;
pub mod config;
pub mod creation;
pub mod database;
pub mod drift;
pub mod gate;
pub mod language;
pub mod models;
pub mod reports;
pub mod routes;
pub mod runner;
pub mod sandbox;
pub mod schedule;
pub mod scheduler;
pub mod uploads;
pub mod web_server;

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};

/// Storage format of every persisted timestamp
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Local data directory of the service
pub fn data_dir() -> PathBuf {
    use directories::ProjectDirs;

    let proj_dirs =
        ProjectDirs::from("", "", "twincheck").expect("Unable to find user directory");
    proj_dirs.data_local_dir().to_path_buf()
}
