//! Host filesystem storage.
//!
//! Storage paths like `/.config/lights.json` resolve under a root directory,
//! e.g. `<root>/.config/lights.json`. Writes go to a temporary sibling file
//! which is then renamed over the target, so a crash mid-write never leaves
//! a truncated document behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::Storage;


#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Storage rooted at `root`. The root itself must exist before writes.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a storage path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Storage for FsStorage {
    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.resolve(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        let target = self.resolve(path);
        let file_name = target
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
            .to_string_lossy()
            .into_owned();
        let tmp = target.with_file_name(format!(".{}.tmp", file_name));
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &target)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn mkdir(&self, path: &str) -> io::Result<()> {
        match fs::create_dir(self.resolve(path)) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            other => other,
        }
    }
}
