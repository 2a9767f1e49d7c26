//! In-memory storage for tests.
//!
//! Behaves like a filesystem that requires parent directories to exist, and
//! records every write and `mkdir` so tests can count side effects.

use std::collections::{BTreeMap, BTreeSet};
use std::io;

use parking_lot::Mutex;

use super::{parent_of, Storage};


#[derive(Debug, Default)]
struct Contents {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    writes: Vec<String>,
    mkdirs: Vec<String>,
    fail_writes: bool,
}


/// A test-double filesystem.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    contents: Mutex<Contents>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, creating its parent directories. Not recorded as a write.
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.put_file(path, contents);
        self
    }

    /// Replace a file behind the engine's back, e.g. to simulate an
    /// external edit. Not recorded as a write.
    pub fn put_file(&self, path: &str, contents: &str) {
        let mut c = self.contents.lock();
        let mut dir = parent_of(path);
        while let Some(d) = dir {
            c.dirs.insert(d.to_string());
            dir = parent_of(d);
        }
        c.files.insert(path.to_string(), contents.as_bytes().to_vec());
    }

    /// Contents of a file as text.
    pub fn file(&self, path: &str) -> Option<String> {
        self.contents
            .lock()
            .files
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.contents.lock().writes.len()
    }

    /// Paths written, in order.
    pub fn writes(&self) -> Vec<String> {
        self.contents.lock().writes.clone()
    }

    /// Every `mkdir` call, in order, including ones for existing dirs.
    pub fn created_dirs(&self) -> Vec<String> {
        self.contents.lock().mkdirs.clone()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.contents.lock().fail_writes = fail;
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.contents.lock().files.get(path).cloned())
    }

    fn write(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        let mut c = self.contents.lock();
        if c.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated write failure"));
        }
        if let Some(parent) = parent_of(path) {
            if !c.dirs.contains(parent) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("missing directory {}", parent),
                ));
            }
        }
        c.files.insert(path.to_string(), contents.to_vec());
        c.writes.push(path.to_string());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        let c = self.contents.lock();
        c.files.contains_key(path) || c.dirs.contains(path)
    }

    fn mkdir(&self, path: &str) -> io::Result<()> {
        let mut c = self.contents.lock();
        if let Some(parent) = parent_of(path) {
            if !c.dirs.contains(parent) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("missing directory {}", parent),
                ));
            }
        }
        c.dirs.insert(path.to_string());
        c.mkdirs.push(path.to_string());
        Ok(())
    }
}
