//! Storage drivers.
//!
//! Persistence talks to a filesystem through the `Storage` trait: whole-file
//! read and write, existence checks and single-level `mkdir`, all addressed
//! by `/`-separated paths. `FsStorage` maps those paths under a host
//! directory; `MemoryStorage` keeps everything in memory and records every
//! call, for tests.

pub mod fs;
pub mod memory;

use std::io;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

/// Byte-level filesystem primitives. Sequencing (directory creation before
/// a write, fallbacks on a failed read) is the caller's job.
pub trait Storage: Send + Sync {
    /// Read a whole file. `Ok(None)` if it does not exist.
    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace a file's contents. Fails if the parent directory is missing.
    fn write(&self, path: &str, contents: &[u8]) -> io::Result<()>;

    /// Whether a file or directory exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Create one directory. The parent must already exist.
    fn mkdir(&self, path: &str) -> io::Result<()>;
}

/// Parent directory of a storage path, `None` for top-level entries.
pub(crate) fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}
