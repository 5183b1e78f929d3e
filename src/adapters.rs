//! Per-language build and run pipelines on top of the container sandbox.
//!
//! Every adapter reads the source, runs the safety gate over it and only then
//! stages it into a scratch workspace that is removed when `execute` returns.

mod cpp;
mod java;
mod javascript;
mod python;

pub use cpp::CppAdapter;
pub use java::JavaAdapter;
pub use javascript::JavaScriptAdapter;
pub use python::PythonAdapter;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::SandboxConfig;
use crate::gate::{self, GateRejection};
use crate::language::Language;
use crate::sandbox::{ContainerOutput, ContainerRun, ContainerRuntime, Mount, SandboxError};

/// Mount point of the staged program inside every container
const WORKDIR: &str = "/work";

/// Result of a program that ran to completion with exit code zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub exit_code: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("failed to stage source: {0}")]
    Staging(#[source] std::io::Error),

    #[error("no class declaration found in Java source")]
    ClassNameNotFound,

    #[error(transparent)]
    Gate(#[from] GateRejection),

    #[error("compilation failed:\n{diagnostics}")]
    Compile { diagnostics: String },

    #[error("compilation timed out after {0:?}")]
    CompileTimeout(Duration),

    #[error("program exited with code {exit_code}: {stderr}")]
    Run { exit_code: i32, stderr: String },

    #[error("program timed out after {0:?}")]
    RunTimeout(Duration),

    #[error("program output exceeded {0} bytes")]
    OutputLimit(u64),

    #[error(transparent)]
    Sandbox(SandboxError),
}

/// Builds and runs one language
pub trait LanguageAdapter: Send + Sync {
    fn language(&self) -> Language;

    /// Blocks until the program has finished or a phase timed out
    fn execute(&self, source: &Path, args: &[String]) -> Result<ExecutionOutcome, ExecError>;
}

/// Everything an adapter needs to reach the sandbox
#[derive(Clone)]
pub struct Toolchain {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    workspace_root: PathBuf,
    compile_timeout: Duration,
    run_timeout: Duration,
    syntax_check_timeout: Duration,
}

impl Toolchain {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, image: &str, config: &SandboxConfig) -> Self {
        Self {
            runtime,
            image: image.to_string(),
            workspace_root: config.workspace_root(),
            compile_timeout: config.compile_timeout(),
            run_timeout: config.run_timeout(),
            syntax_check_timeout: config.syntax_check_timeout(),
        }
    }

    fn container(
        &self,
        mounts: Vec<Mount>,
        command: Vec<String>,
        timeout: Duration,
    ) -> ContainerRun {
        ContainerRun {
            image: self.image.clone(),
            mounts,
            workdir: WORKDIR.to_string(),
            command,
            timeout,
        }
    }

    /// Runs a build step; a non-zero exit is a compile error
    fn compile(
        &self,
        mounts: Vec<Mount>,
        command: Vec<String>,
        timeout: Duration,
    ) -> Result<(), ExecError> {
        match self.runtime.run(&self.container(mounts, command, timeout)) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(ExecError::Compile {
                diagnostics: diagnostics(&output),
            }),
            Err(SandboxError::Timeout { after }) => Err(ExecError::CompileTimeout(after)),
            Err(SandboxError::OutputLimit { limit }) => Err(ExecError::OutputLimit(limit)),
            Err(e) => Err(ExecError::Sandbox(e)),
        }
    }

    /// Runs the program itself with the workspace mounted read-only
    fn run(&self, staged: &Path, command: Vec<String>) -> Result<ExecutionOutcome, ExecError> {
        let mounts = vec![Mount::read_only(staged, WORKDIR)];
        let spec = self.container(mounts, command, self.run_timeout);
        match self.runtime.run(&spec) {
            Ok(output) if output.success() => Ok(ExecutionOutcome {
                stdout: output.stdout,
                exit_code: output.exit_code,
            }),
            Ok(output) => Err(ExecError::Run {
                exit_code: output.exit_code,
                stderr: output.stderr,
            }),
            Err(SandboxError::Timeout { after }) => Err(ExecError::RunTimeout(after)),
            Err(SandboxError::OutputLimit { limit }) => Err(ExecError::OutputLimit(limit)),
            Err(e) => Err(ExecError::Sandbox(e)),
        }
    }
}

fn diagnostics(output: &ContainerOutput) -> String {
    match (output.stderr.trim(), output.stdout.trim()) {
        (stderr, "") => stderr.to_string(),
        ("", stdout) => stdout.to_string(),
        (stderr, stdout) => format!("{stderr}\n{stdout}"),
    }
}

/// Checks the extension, reads the source and gates it
fn load_source(source: &Path, language: Language) -> Result<String, ExecError> {
    if Language::from_path(source) != Some(language) {
        return Err(unsupported(source));
    }
    let text = fs::read_to_string(source).map_err(ExecError::Staging)?;
    gate::check(&text, language)?;
    Ok(text)
}

fn unsupported(source: &Path) -> ExecError {
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    ExecError::UnsupportedExtension(ext)
}

/// Scratch directory owned by one execution, removed on drop
struct Workspace {
    _dir: TempDir,
    /// Canonical path, as the container engine needs it
    root: PathBuf,
}

impl Workspace {
    fn create(toolchain: &Toolchain) -> Result<Self, ExecError> {
        fs::create_dir_all(&toolchain.workspace_root).map_err(ExecError::Staging)?;
        let dir = tempfile::Builder::new()
            .prefix("twincheck-")
            .tempdir_in(&toolchain.workspace_root)
            .map_err(ExecError::Staging)?;
        let root = dir.path().canonicalize().map_err(ExecError::Staging)?;
        Ok(Self { _dir: dir, root })
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn subdir(&self, name: &str) -> Result<PathBuf, ExecError> {
        let path = self.root.join(name);
        fs::create_dir(&path).map_err(ExecError::Staging)?;
        Ok(path)
    }

    fn write(&self, dir: &Path, file_name: &str, contents: &str) -> Result<(), ExecError> {
        fs::write(dir.join(file_name), contents).map_err(ExecError::Staging)
    }
}

fn command<I, S>(parts: I, args: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts
        .into_iter()
        .map(Into::into)
        .chain(args.iter().cloned())
        .collect()
}

/// Routes a source file to its adapter by extension
pub struct AdapterRegistry {
    by_extension: HashMap<&'static str, Arc<dyn LanguageAdapter>>,
}

impl AdapterRegistry {
    /// One adapter per supported language, all sharing `runtime`
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &SandboxConfig) -> Self {
        let images = &config.images;
        let adapters: [Arc<dyn LanguageAdapter>; 4] = [
            Arc::new(CppAdapter::new(Toolchain::new(runtime.clone(), &images.cpp, config))),
            Arc::new(PythonAdapter::new(Toolchain::new(runtime.clone(), &images.python, config))),
            Arc::new(JavaAdapter::new(Toolchain::new(runtime.clone(), &images.java, config))),
            Arc::new(JavaScriptAdapter::new(Toolchain::new(runtime, &images.javascript, config))),
        ];

        let mut by_extension = HashMap::new();
        for adapter in adapters {
            for ext in adapter.language().extensions() {
                by_extension.insert(*ext, adapter.clone());
            }
        }
        Self { by_extension }
    }

    pub fn for_path(&self, source: &Path) -> Result<Arc<dyn LanguageAdapter>, ExecError> {
        source
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.by_extension.get(ext.to_ascii_lowercase().as_str()))
            .cloned()
            .ok_or_else(|| unsupported(source))
    }

    pub fn execute(&self, source: &Path, args: &[String]) -> Result<ExecutionOutcome, ExecError> {
        self.for_path(source)?.execute(source, args)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_registry_routes_by_extension() {
        let root = tempfile::tempdir().unwrap();
        let registry = AdapterRegistry::new(ScriptedRuntime::new(vec![]), &config(root.path()));

        for (file, language) in [
            ("a.cpp", Language::Cpp),
            ("a.CC", Language::Cpp),
            ("a.py", Language::Python),
            ("Main.java", Language::Java),
            ("a.mjs", Language::JavaScript),
        ] {
            let adapter = registry.for_path(Path::new(file)).unwrap();
            assert_eq!(adapter.language(), language, "{file}");
        }

        let err = registry.execute(Path::new("a.rb"), &[]).unwrap_err();
        assert!(matches!(err, ExecError::UnsupportedExtension(ext) if ext == "rb"));
        assert!(registry.for_path(Path::new("Makefile")).is_err());
    }

    #[test]
    fn test_gate_rejects_before_any_container_call() {
        let root = tempfile::tempdir().unwrap();
        let runtime = ScriptedRuntime::new(vec![]);
        let registry = AdapterRegistry::new(runtime.clone(), &config(root.path()));

        let body = "for (int i = 0; i < 1; ++i) {}\n".repeat(25);
        let path = source(root.path(), "loops.cpp", &format!("int main() {{\n{body}}}\n"));

        let err = registry.execute(&path, &[]).unwrap_err();
        assert!(matches!(err, ExecError::Gate(GateRejection::BigLoop { count: 25 })));
        assert!(err.to_string().contains("big loop detected"));
        assert!(runtime.calls().is_empty());
        assert_workspaces_removed(root.path());
    }

    #[test]
    fn test_missing_source_is_a_staging_error() {
        let root = tempfile::tempdir().unwrap();
        let registry = AdapterRegistry::new(ScriptedRuntime::new(vec![]), &config(root.path()));
        let err = registry.execute(&root.path().join("gone.py"), &[]).unwrap_err();
        assert!(matches!(err, ExecError::Staging(_)));
    }
}
