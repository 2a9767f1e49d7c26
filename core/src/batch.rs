//! Batch commit coordinator.
//!
//! Collects the pending writes of every persistence binding running in
//! delayed mode, whatever their state type, and flushes them together when
//! an external actor says so: `W` commits every pending write to storage,
//! `C` cancels them and reloads each binding from what is on disk.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StateError};


// ---------------------------------------------------------------------------
// BatchOp
// ---------------------------------------------------------------------------

/// The two batch signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp {
    /// `W`: write every pending change.
    Commit,
    /// `C`: discard every pending change and restore on-disk state.
    Cancel,
}

impl BatchOp {
    pub fn from_char(c: char) -> Result<Self> {
        match c {
            'W' => Ok(BatchOp::Commit),
            'C' => Ok(BatchOp::Cancel),
            other => Err(StateError::UnknownOpcode(other)),
        }
    }

    pub fn as_char(self) -> char {
        match self {
            BatchOp::Commit => 'W',
            BatchOp::Cancel => 'C',
        }
    }
}

impl FromStr for BatchOp {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => BatchOp::from_char(c),
            (Some(c), Some(_)) => Err(StateError::UnknownOpcode(c)),
            (None, _) => Err(StateError::UnknownOpcode(' ')),
        }
    }
}

impl fmt::Display for BatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}


// ---------------------------------------------------------------------------
// PendingWrite
// ---------------------------------------------------------------------------

type FlushFn = Box<dyn FnOnce(BatchOp) -> Result<()> + Send>;

/// One dirty binding waiting for a batch signal.
pub struct PendingWrite {
    path: String,
    flush: FlushFn,
}

impl PendingWrite {
    /// `flush` receives the signal and either writes or rolls back.
    pub fn new<F>(path: impl Into<String>, flush: F) -> Self
    where
        F: FnOnce(BatchOp) -> Result<()> + Send + 'static,
    {
        PendingWrite {
            path: path.into(),
            flush: Box::new(flush),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWrite").field("path", &self.path).finish()
    }
}


/// What happened during one commit or cancel.
#[derive(Debug)]
pub struct FlushReport {
    pub op: BatchOp,
    /// Paths processed, in registration order, including failed ones.
    pub flushed: Vec<String>,
    pub failures: Vec<(String, StateError)>,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}


// ---------------------------------------------------------------------------
// BatchCoordinator
// ---------------------------------------------------------------------------

/// Shared registry of pending writes. Clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct BatchCoordinator {
    pending: Arc<Mutex<Vec<PendingWrite>>>,
}

impl BatchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pending write. Bindings coalesce on their side, so each
    /// contributes at most one entry per batch.
    pub fn register(&self, entry: PendingWrite) {
        tracing::debug!(path = entry.path(), "delayed write queued");
        self.pending.lock().push(entry);
    }

    /// Write every pending change, then clear the registry.
    pub fn commit(&self) -> FlushReport {
        self.flush(BatchOp::Commit)
    }

    /// Roll back every pending change from storage, then clear the registry.
    pub fn cancel(&self) -> FlushReport {
        self.flush(BatchOp::Cancel)
    }

    pub fn apply(&self, op: BatchOp) -> FlushReport {
        self.flush(op)
    }

    /// Entries are taken out before any runs: the registry is empty even if
    /// an entry fails, and entries may queue new writes for the next batch.
    fn flush(&self, op: BatchOp) -> FlushReport {
        let entries = std::mem::take(&mut *self.pending.lock());
        tracing::debug!(op = %op, count = entries.len(), "flushing delayed writes");

        let mut report = FlushReport {
            op,
            flushed: Vec::with_capacity(entries.len()),
            failures: Vec::new(),
        };
        for entry in entries {
            let PendingWrite { path, flush } = entry;
            if let Err(e) = flush(op) {
                tracing::warn!(path = %path, op = %op, error = %e, "delayed write failed");
                report.failures.push((path.clone(), e));
            }
            report.flushed.push(path);
        }
        report
    }

    /// Whether there are uncommitted changes.
    pub fn save_needed(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn pending_paths(&self) -> Vec<String> {
        self.pending
            .lock()
            .iter()
            .map(|e| e.path.clone())
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn recording(
        log: &Arc<Mutex<Vec<String>>>,
        path: &str,
    ) -> PendingWrite {
        let log = Arc::clone(log);
        let tag = path.to_string();
        PendingWrite::new(path, move |op| {
            log.lock().push(format!("{}{}", op, tag));
            Ok(())
        })
    }

    #[test]
    fn opcodes_parse() {
        assert_eq!(BatchOp::from_char('W').unwrap(), BatchOp::Commit);
        assert_eq!(BatchOp::from_char('C').unwrap(), BatchOp::Cancel);
        assert!(matches!(
            BatchOp::from_char('w'),
            Err(StateError::UnknownOpcode('w'))
        ));
        assert_eq!(" W\n".parse::<BatchOp>().unwrap(), BatchOp::Commit);
        assert!("WC".parse::<BatchOp>().is_err());
        assert!("".parse::<BatchOp>().is_err());
    }

    #[test]
    fn commit_runs_entries_in_order_and_clears() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coord = BatchCoordinator::new();
        coord.register(recording(&log, "/a"));
        coord.register(recording(&log, "/b"));
        assert!(coord.save_needed());
        assert_eq!(coord.pending_paths(), vec!["/a", "/b"]);

        let report = coord.commit();

        assert!(report.is_ok());
        assert_eq!(report.op, BatchOp::Commit);
        assert_eq!(report.flushed, vec!["/a", "/b"]);
        assert_eq!(*log.lock(), vec!["W/a", "W/b"]);
        assert_eq!(coord.pending_count(), 0);
        assert!(!coord.save_needed());
    }

    #[test]
    fn cancel_passes_cancel_signal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coord = BatchCoordinator::new();
        coord.register(recording(&log, "/a"));
        coord.apply(BatchOp::Cancel);
        assert_eq!(*log.lock(), vec!["C/a"]);
    }

    #[test]
    fn empty_registry_is_noop() {
        let coord = BatchCoordinator::new();
        let report = coord.commit();
        assert!(report.flushed.is_empty());
        let report = coord.cancel();
        assert!(report.flushed.is_empty());
    }

    #[test]
    fn failing_entry_does_not_block_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coord = BatchCoordinator::new();
        coord.register(PendingWrite::new("/broken", |_| {
            Err(StateError::io(
                "/broken",
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ))
        }));
        coord.register(recording(&log, "/ok"));

        let report = coord.commit();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "/broken");
        assert_eq!(*log.lock(), vec!["W/ok"]);
        assert_eq!(coord.pending_count(), 0);
    }

    #[test]
    fn entry_may_queue_for_next_batch() {
        let coord = BatchCoordinator::new();
        let inner = coord.clone();
        coord.register(PendingWrite::new("/first", move |_| {
            inner.register(PendingWrite::new("/second", |_| Ok(())));
            Ok(())
        }));

        let report = coord.commit();

        assert_eq!(report.flushed, vec!["/first"]);
        assert_eq!(coord.pending_paths(), vec!["/second"]);
    }

    #[test]
    fn clones_share_registry() {
        let a = BatchCoordinator::new();
        let b = a.clone();
        a.register(PendingWrite::new("/x", |_| Ok(())));
        assert_eq!(b.pending_count(), 1);
    }
}
