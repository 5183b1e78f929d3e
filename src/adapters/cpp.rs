use std::path::Path;

use crate::language::Language;
use crate::sandbox::Mount;

use super::{
    ExecError, ExecutionOutcome, LanguageAdapter, Toolchain, Workspace, command, load_source,
};

const SOURCE_NAME: &str = "main.cpp";
const BINARY_NAME: &str = "app";

const COMPILE_FLAGS: [&str; 6] = [
    "-std=c++17",
    "-O2",
    "-pipe",
    "-static-libstdc++",
    "-static-libgcc",
    "-I/src",
];

/// Compiles with g++ into a separate build directory, then runs the binary
pub struct CppAdapter {
    toolchain: Toolchain,
}

impl CppAdapter {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    fn compile_command() -> Vec<String> {
        let output = format!("/build/{BINARY_NAME}");
        let source = format!("/src/{SOURCE_NAME}");
        command(
            std::iter::once("g++")
                .chain(COMPILE_FLAGS)
                .chain([source.as_str(), "-o", output.as_str()]),
            &[],
        )
    }
}

impl LanguageAdapter for CppAdapter {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn execute(&self, source: &Path, args: &[String]) -> Result<ExecutionOutcome, ExecError> {
        let text = load_source(source, Language::Cpp)?;

        let workspace = Workspace::create(&self.toolchain)?;
        let src_dir = workspace.subdir("src")?;
        let build_dir = workspace.subdir("build")?;
        workspace.write(&src_dir, SOURCE_NAME, &text)?;

        self.toolchain.compile(
            vec![
                Mount::read_only(&src_dir, "/src"),
                Mount::writable(&build_dir, "/build"),
            ],
            Self::compile_command(),
            self.toolchain.compile_timeout,
        )?;

        let binary = format!("{}/{BINARY_NAME}", super::WORKDIR);
        self.toolchain.run(&build_dir, command([binary], args))
    }
}
