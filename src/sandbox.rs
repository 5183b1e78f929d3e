mod docker;

pub use docker::DockerRuntime;

use std::path::PathBuf;
use std::time::Duration;

/// Resource caps applied to every container. Adapters choose image, mounts,
/// command and timeout; they cannot relax these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub pids: u32,
    pub memory_mib: u32,
    /// Passed verbatim to `--cpus`
    pub cpus: &'static str,
    pub tmp_size_mib: u32,
    pub run_size_mib: u32,
    /// Per stream, enforced on the host side while reading the pipes
    pub output_bytes: u64,
}

pub const LIMITS: ResourceLimits = ResourceLimits {
    pids: 128,
    memory_mib: 256,
    cpus: "0.5",
    tmp_size_mib: 16,
    run_size_mib: 1,
    output_bytes: 1 << 20,
};

/// A host directory bind-mounted into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(host: impl Into<PathBuf>, target: &str) -> Self {
        Self {
            host: host.into(),
            target: target.to_string(),
            read_only: true,
        }
    }

    pub fn writable(host: impl Into<PathBuf>, target: &str) -> Self {
        Self {
            host: host.into(),
            target: target.to_string(),
            read_only: false,
        }
    }
}

/// One sandboxed invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRun {
    pub image: String,
    pub mounts: Vec<Mount>,
    pub workdir: String,
    pub command: Vec<String>,
    pub timeout: Duration,
}

/// What the process inside the container produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status of the sandboxed process itself
    pub exit_code: i32,
}

impl ContainerOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to start container engine: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine could not create or start the container
    #[error("container launch failed (code {code:?}): {stderr}")]
    Launch { code: Option<i32>, stderr: String },

    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    /// The process wrote more than allowed to stdout or stderr and was killed
    #[error("output exceeded {limit} bytes")]
    OutputLimit { limit: u64 },
}

/// A local container engine
///
/// Implementations block the calling thread until the process exits or the
/// run's timeout elapses, and must leave no container behind either way.
pub trait ContainerRuntime: Send + Sync {
    fn run(&self, spec: &ContainerRun) -> Result<ContainerOutput, SandboxError>;
}
