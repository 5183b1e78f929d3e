use std::fmt;
use std::path::Path;

/// Languages a task program may be written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Cpp,
    Python,
    Java,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Cpp,
        Language::Python,
        Language::Java,
        Language::JavaScript,
    ];

    /// Allow-listed file extensions, lowercase and without the dot
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Language::Cpp => &["cpp", "cc", "cxx"],
            Language::Python => &["py"],
            Language::Java => &["java"],
            Language::JavaScript => &["js", "mjs"],
        }
    }

    pub fn from_extension(ext: &str) -> Option<Language> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }

    pub fn from_path(path: &Path) -> Option<Language> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Cpp => "C++",
            Language::Python => "Python",
            Language::Java => "Java",
            Language::JavaScript => "JavaScript",
        };
        f.write_str(name)
    }
}
