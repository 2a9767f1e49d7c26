//! Handler registries.
//!
//! Handlers live in an arena: a growable table of slots where a handle is the
//! slot index plus one. Removing a handler empties its slot without shifting
//! the others, so outstanding handles stay valid and ids are never reused.

use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::update::UpdateResult;

/// Observer called with the origin id after a `Changed` update.
pub type UpdateHandler = dyn Fn(&str) + Send + Sync;

/// Observer called with the origin id and result after every propagating
/// update attempt.
pub type HookHandler = dyn Fn(&str, UpdateResult) + Send + Sync;


/// Opaque, non-zero handle to a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(NonZeroUsize);

impl HandlerId {
    fn from_index(index: usize) -> Self {
        HandlerId(NonZeroUsize::MIN.saturating_add(index))
    }

    fn index(self) -> usize {
        self.0.get() - 1
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}


struct Slot<F: ?Sized> {
    callback: Arc<F>,
    allow_remove: bool,
}


/// Arena of callbacks, iterated in registration order.
pub struct HandlerRegistry<F: ?Sized> {
    slots: Vec<Option<Slot<F>>>,
}

impl<F: ?Sized> HandlerRegistry<F> {
    pub fn new() -> Self {
        HandlerRegistry { slots: Vec::new() }
    }

    /// Append a handler and return its handle.
    ///
    /// A handler added with `allow_remove == false` stays registered for the
    /// lifetime of the registry.
    pub fn add(&mut self, callback: Arc<F>, allow_remove: bool) -> HandlerId {
        let id = HandlerId::from_index(self.slots.len());
        self.slots.push(Some(Slot {
            callback,
            allow_remove,
        }));
        id
    }

    /// Remove the handler with this id. Returns whether a handler was
    /// removed; unknown, already-removed and non-removable ids are ignored.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return false;
        };
        if slot.as_ref().is_some_and(|s| s.allow_remove) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Whether `id` refers to a live handler.
    pub fn contains(&self, id: HandlerId) -> bool {
        matches!(self.slots.get(id.index()), Some(Some(_)))
    }

    /// Live callbacks in registration order.
    ///
    /// Callers invoke the snapshot after releasing whatever lock guards the
    /// registry, so a handler can add or remove handlers without deadlock.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| Arc::clone(&slot.callback))
            .collect()
    }

    /// Number of live handlers.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F: ?Sized> Default for HandlerRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}


/// Run one handler, containing a panic so the remaining handlers still run.
///
/// Returns false if the handler panicked.
pub(crate) fn invoke_isolated(kind: &str, origin_id: &str, call: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(()) => true,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(kind, origin_id, %reason, "handler panicked");
            false
        }
    }
}
