use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::drift::ZeroExpectedPolicy;

#[derive(Parser)]
#[command(name = "twincheck", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file, or defaults when none is given
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let Some(path) = &self.config_path else {
            return Ok(Config::default());
        };
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub uploads: UploadsConfig,
    pub sandbox: SandboxConfig,
    pub drift: DriftConfig,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
pub struct UploadsConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub docker_binary: String,
    /// Host directory under which per-execution workspaces are created.
    /// Must be visible to the container daemon for bind mounts.
    pub workspace_root: Option<PathBuf>,
    pub images: ImageConfig,
    pub compile_timeout_secs: u64,
    pub run_timeout_secs: u64,
    pub syntax_check_timeout_secs: u64,
}

impl SandboxConfig {
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn syntax_check_timeout(&self) -> Duration {
        Duration::from_secs(self.syntax_check_timeout_secs)
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            workspace_root: None,
            images: ImageConfig::default(),
            compile_timeout_secs: 200,
            run_timeout_secs: 200,
            syntax_check_timeout_secs: 10,
        }
    }
}

/// Compiler/runtime image per language
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ImageConfig {
    pub cpp: String,
    pub python: String,
    pub java: String,
    pub javascript: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            cpp: "gcc:13".to_string(),
            python: "python:3.11-slim".to_string(),
            java: "openjdk:17-slim".to_string(),
            javascript: "node:20-slim".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(default)]
pub struct DriftConfig {
    pub zero_expected: ZeroExpectedPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let file = std::fs::File::open("config/example.json").unwrap();
        let reader = std::io::BufReader::new(file);
        let config: Config = serde_json::from_reader(reader).unwrap();
        assert_eq!(config.server.bind_address, Some("127.0.0.1".to_string()));
        assert_eq!(config.server.bind_port, Some(8080));
        assert_eq!(config.sandbox.images.cpp, "gcc:13");
        assert_eq!(config.sandbox.compile_timeout(), Duration::from_secs(120));
        assert_eq!(config.sandbox.syntax_check_timeout(), Duration::from_secs(10));
        assert_eq!(config.drift.zero_expected, ZeroExpectedPolicy::Legacy);
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "sandbox": { "run_timeout_secs": 5 } }"#).unwrap();
        assert_eq!(config.sandbox.run_timeout(), Duration::from_secs(5));
        assert_eq!(config.sandbox.compile_timeout(), Duration::from_secs(200));
        assert_eq!(config.sandbox.docker_binary, "docker");
        assert_eq!(config.sandbox.images.javascript, "node:20-slim");
        assert!(config.database.path.is_none());
    }
}
