use std::path::Path;

use crate::language::Language;
use crate::sandbox::Mount;

use super::{
    ExecError, ExecutionOutcome, LanguageAdapter, Toolchain, WORKDIR, Workspace, command,
    load_source,
};

const SCRIPT_NAME: &str = "script.py";

/// Byte-compiles the script as a syntax check, then runs it unbuffered
pub struct PythonAdapter {
    toolchain: Toolchain,
}

impl PythonAdapter {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }
}

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn execute(&self, source: &Path, args: &[String]) -> Result<ExecutionOutcome, ExecError> {
        let text = load_source(source, Language::Python)?;

        let workspace = Workspace::create(&self.toolchain)?;
        workspace.write(workspace.path(), SCRIPT_NAME, &text)?;

        self.toolchain.compile(
            vec![Mount::writable(workspace.path(), WORKDIR)],
            command(["python", "-m", "py_compile", SCRIPT_NAME], &[]),
            self.toolchain.syntax_check_timeout,
        )?;

        self.toolchain
            .run(workspace.path(), command(["python", "-u", SCRIPT_NAME], args))
    }
}
