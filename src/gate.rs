//! Static pre-execution scan of program source.
//!
//! The gate never parses the source. It counts loop constructs and matches a
//! per-language list of patterns for capabilities a twin program has no use
//! for (process spawning, raw file/syscall access, networking, reflection and
//! dynamic code loading).

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::language::Language;

/// More loop constructs than this rejects the source
pub const LOOP_THRESHOLD: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateRejection {
    #[error("big loop detected ({count} loop constructs, limit {limit})", limit = LOOP_THRESHOLD)]
    BigLoop { count: usize },

    #[error("dangerous call detected: {}", join_tokens(.tokens))]
    DangerousCall { tokens: BTreeSet<String> },
}

fn join_tokens(tokens: &BTreeSet<String>) -> String {
    tokens.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Everything the scan found, before the verdict is applied
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub loop_count: usize,
    pub matched: BTreeSet<String>,
}

impl ScanReport {
    /// The loop check wins over the API check
    pub fn verdict(self) -> Result<(), GateRejection> {
        if self.loop_count > LOOP_THRESHOLD {
            return Err(GateRejection::BigLoop {
                count: self.loop_count,
            });
        }
        if !self.matched.is_empty() {
            return Err(GateRejection::DangerousCall {
                tokens: self.matched,
            });
        }
        Ok(())
    }
}

struct Rules {
    loops: Vec<Regex>,
    dangerous: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid gate pattern {p}: {e}")))
        .collect()
}

static CPP_RULES: LazyLock<Rules> = LazyLock::new(|| Rules {
    loops: compile(&[r"\bfor\s*\(", r"\bwhile\s*\("]),
    dangerous: compile(&[
        r"\bsystem\s*\(",
        r"\bexec\s*vp?\s*\(",
        r"\bexec[lv]p?e?\s*\(",
        r"\bfork\s*\(",
        r"\bpopen\s*\(",
        r"\bopen\s*\(",
        r"\bioctl\s*\(",
        r"\bptrace\s*\(",
        r"\bsyscall\s*\(",
        r"\bsocket\s*\(",
        r"\bconnect\s*\(",
        r"\bbind\s*\(",
        r"\baccept\s*\(",
        r"\bdlopen\s*\(",
    ]),
});

static PYTHON_RULES: LazyLock<Rules> = LazyLock::new(|| Rules {
    loops: compile(&[r"\bfor\s+\w+\s+in\s+", r"\bwhile\s+.+:"]),
    dangerous: compile(&[
        // process execution
        r"\bos\.system\s*\(",
        r"\bsubprocess\.call\s*\(",
        r"\bsubprocess\.run\s*\(",
        r"\bsubprocess\.Popen\s*\(",
        r"\bos\.popen\s*\(",
        r"\bos\.spawn",
        r"\bos\.exec",
        r"\beval\s*\(",
        r"\bexec\s*\(",
        r"\b__import__\s*\(",
        r"\bcompile\s*\(",
        // file system
        r"\bos\.remove\s*\(",
        r"\bos\.rmdir\s*\(",
        r"\bos\.unlink\s*\(",
        r"\bshutil\.rmtree\s*\(",
        // network
        r"\bsocket\.socket\s*\(",
        r"\bsocket\.connect\s*\(",
        r"\bsocket\.bind\s*\(",
        r"\bsocket\.accept\s*\(",
        r"\burllib\.request",
        r"\brequests\.",
        // imports
        r"\bimport\s+os\b",
        r"\bfrom\s+os\s+import",
        r"\bimport\s+subprocess\b",
        r"\bfrom\s+subprocess\s+import",
        r"\bimport\s+socket\b",
        r"\bfrom\s+socket\s+import",
        r"\bimport\s+ctypes\b",
        r"\bfrom\s+ctypes\s+import",
        // deserialization
        r"\bpickle\.loads\s*\(",
        r"\byaml\.load\s*\(",
        r"\bmarshal\.loads\s*\(",
    ]),
});

static JAVA_RULES: LazyLock<Rules> = LazyLock::new(|| Rules {
    loops: compile(&[r"\bfor\s*\(", r"\bwhile\s*\(", r"\bdo\s*\{"]),
    dangerous: compile(&[
        // process execution
        r"Runtime\.getRuntime\(\)\.exec",
        r"ProcessBuilder",
        r"\bexec\s*\(",
        // file system
        r"\bdelete\s*\(",
        r"Files\.delete",
        r"\.deleteOnExit\s*\(",
        // network
        r"Socket",
        r"URLConnection",
        // reflection
        r"Class\.forName",
        r"\.newInstance\s*\(",
        r"Method\.invoke",
        r"\.getDeclaredField",
        r"\.setAccessible\s*\(",
        r"ClassLoader",
        r"defineClass",
        // native code
        r"System\.load",
        r"\bnative\s+\w+",
        r"SecurityManager",
        r"Thread\.sleep",
        r"ExecutorService",
        // serialization and script engines
        r"ObjectInputStream",
        r"readObject\s*\(",
        r"ScriptEngine",
        r"InitialContext",
        r"lookup\s*\(",
        r"System\.setProperty",
        r"System\.getenv",
    ]),
});

/// Quoted name of a Node module with host access, `node:` scheme optional
macro_rules! node_module {
    () => {
        concat!(
            r#"['"](node:)?"#,
            "(child_process|fs|fs/promises|net|http|https|dns|vm",
            "|worker_threads|cluster|inspector|os)",
            r#"['"]"#,
        )
    };
}

static JAVASCRIPT_RULES: LazyLock<Rules> = LazyLock::new(|| Rules {
    loops: compile(&[r"\bfor\s*\(", r"\bwhile\s*\(", r"\bdo\s*\{"]),
    dangerous: compile(&[
        // module loading, CommonJS and ES, with or without the node: scheme
        concat!(r#"require\s*\(\s*"#, node_module!()),
        concat!(r#"\bimport\b[^;]*?\bfrom\s*"#, node_module!()),
        concat!(r#"\bimport\s*"#, node_module!()),
        // process execution, also as destructured imports
        r"\bexec(Sync|File|FileSync)?\s*\(",
        r"\bspawn(Sync)?\s*\(",
        r"\bfork\s*\(",
        r"\.exec\s*\(",
        r"\.execSync\s*\(",
        r"\.spawn\s*\(",
        r"\.spawnSync\s*\(",
        r"\.fork\s*\(",
        r"\.execFile\s*\(",
        // file system
        r"\.unlink(Sync)?\s*\(",
        r"\.rmdir(Sync)?\s*\(",
        r"\.rm(Sync)?\s*\(",
        // network
        r"\.createServer\s*\(",
        r"\.connect\s*\(",
        r"\.request\s*\(",
        // code generation
        r"\beval\s*\(",
        r"\bFunction\s*\(",
        r#"\bset(Timeout|Interval)\s*\(\s*['"`]"#,
        r"\.runIn(New|This)?Context\s*\(",
        r"\bnew\s+Worker\s*\(",
        // process manipulation
        r"process\.(exit|kill|abort)\s*\(",
        r"\bimport\s*\(",
        r"\bdebugger\b",
        r"WebAssembly\.(compile|instantiate)",
    ]),
});

fn rules(language: Language) -> &'static Rules {
    match language {
        Language::Cpp => &*CPP_RULES,
        Language::Python => &*PYTHON_RULES,
        Language::Java => &*JAVA_RULES,
        Language::JavaScript => &*JAVASCRIPT_RULES,
    }
}

/// Counts loop constructs and collects the de-duplicated offending tokens
pub fn scan(source: &str, language: Language) -> ScanReport {
    let rules = rules(language);

    let loop_count = rules
        .loops
        .iter()
        .map(|re| re.find_iter(source).count())
        .sum();

    let matched = rules
        .dangerous
        .iter()
        .filter_map(|re| re.find(source))
        .map(|m| m.as_str().trim().to_string())
        .collect();

    ScanReport {
        loop_count,
        matched,
    }
}

/// Scans the source and rejects it if either heuristic trips
pub fn check(source: &str, language: Language) -> Result<(), GateRejection> {
    let report = scan(source, language);
    log::debug!(
        "Gate scanned {language} source: {} loops, {} dangerous tokens",
        report.loop_count,
        report.matched.len()
    );
    report.verdict()
}
