use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::language::Language;
use crate::sandbox::Mount;

use super::{
    ExecError, ExecutionOutcome, LanguageAdapter, Toolchain, WORKDIR, Workspace, command,
    load_source,
};

static PUBLIC_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bpublic\s+(?:(?:final|abstract)\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .unwrap_or_else(|e| panic!("invalid class pattern: {e}"))
});

static ANY_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bclass\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .unwrap_or_else(|e| panic!("invalid class pattern: {e}"))
});

/// Block and line comments, and string literals
static NOT_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)/\*.*?\*/|//[^\n]*|"(?:\\.|[^"\\\n])*""#)
        .unwrap_or_else(|e| panic!("invalid comment pattern: {e}"))
});

const JVM_FLAGS: [&str; 3] = ["-Djava.security.manager=allow", "-Xmx128m", "-Xss256k"];

/// javac needs the file named after its public class, so the class name is
/// read from the source before staging. Comments and string literals are
/// blanked out first.
pub fn class_name(source: &str) -> Option<String> {
    let code = NOT_CODE.replace_all(source, " ");
    [&*PUBLIC_CLASS, &*ANY_CLASS]
        .into_iter()
        .find_map(|re| re.captures(&code))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub struct JavaAdapter {
    toolchain: Toolchain,
}

impl JavaAdapter {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }
}

impl LanguageAdapter for JavaAdapter {
    fn language(&self) -> Language {
        Language::Java
    }

    fn execute(&self, source: &Path, args: &[String]) -> Result<ExecutionOutcome, ExecError> {
        let text = load_source(source, Language::Java)?;
        let class = class_name(&text).ok_or(ExecError::ClassNameNotFound)?;
        let file_name = format!("{class}.java");

        let workspace = Workspace::create(&self.toolchain)?;
        workspace.write(workspace.path(), &file_name, &text)?;

        self.toolchain.compile(
            vec![Mount::writable(workspace.path(), WORKDIR)],
            command(["javac", "-J-Xmx128m", file_name.as_str()], &[]),
            self.toolchain.compile_timeout,
        )?;

        let java = std::iter::once("java")
            .chain(JVM_FLAGS)
            .chain(["-cp", WORKDIR, class.as_str()]);
        self.toolchain.run(workspace.path(), command(java, args))
    }
}
