use std::path::Path;

use crate::language::Language;

use super::{
    ExecError, ExecutionOutcome, LanguageAdapter, Toolchain, Workspace, command, load_source,
};

const NODE_FLAGS: [&str; 3] = [
    "--max-old-space-size=128",
    "--no-warnings",
    "--disallow-code-generation-from-strings",
];

/// Runs the script under node; there is no build phase
pub struct JavaScriptAdapter {
    toolchain: Toolchain,
}

impl JavaScriptAdapter {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }
}

impl LanguageAdapter for JavaScriptAdapter {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn execute(&self, source: &Path, args: &[String]) -> Result<ExecutionOutcome, ExecError> {
        let text = load_source(source, Language::JavaScript)?;

        // ES modules keep their extension so node loads them as modules
        let is_module = source
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mjs"));
        let script = if is_module { "script.mjs" } else { "script.js" };

        let workspace = Workspace::create(&self.toolchain)?;
        workspace.write(workspace.path(), script, &text)?;

        let node = std::iter::once("node").chain(NODE_FLAGS).chain([script]);
        self.toolchain.run(workspace.path(), command(node, args))
    }
}
