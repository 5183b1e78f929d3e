use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Where uploaded task programs are kept for the lifetime of their task
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Default location under the local data directory
    pub fn default_root() -> PathBuf {
        crate::data_dir().join("uploads")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores `contents` under a random name that keeps the lower-cased
    /// extension of `file_name`
    pub fn save(&self, file_name: &str, contents: &str) -> io::Result<PathBuf> {
        let ext = Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "file name has no extension")
            })?;

        let path = self.root.join(format!("{}.{ext}", Uuid::new_v4()));
        fs::write(&path, contents)?;
        log::debug!("Stored upload {file_name} as {}", path.display());
        Ok(path)
    }

    pub fn remove(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Unable to remove upload {}: {e}", path.display());
        }
    }
}
