//! Update function pair.
//!
//! Every module that wants its state served and persisted describes it with
//! [`JsonState`]: a read function producing a complete document, and an
//! updater that applies a (possibly partial) document to the state.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Origin id used for changes the engine makes on its own behalf,
/// e.g. reverting state after a cancelled batch.
pub const ORIGIN_SERVER: &str = "server";


/// Outcome of one update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateResult {
    /// Nothing observable changed. No notification, no persistence.
    Unchanged,
    /// State was modified. Handlers run and the change is persisted.
    Changed,
    /// The update was rejected and state left as it was.
    Error,
}

impl UpdateResult {
    pub fn is_changed(self) -> bool {
        self == UpdateResult::Changed
    }

    /// `Changed` if `changed`, else `Unchanged`.
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            UpdateResult::Changed
        } else {
            UpdateResult::Unchanged
        }
    }
}

impl fmt::Display for UpdateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateResult::Unchanged => write!(f, "unchanged"),
            UpdateResult::Changed => write!(f, "changed"),
            UpdateResult::Error => write!(f, "error"),
        }
    }
}


/// Read/update contract for a module's state.
///
/// `Document` is the serialized shape. Fields a partial update may omit
/// should be `Option`s so that absent fields are left alone; the empty
/// document (`Document::default()`) is what the updater receives when no
/// stored state exists, so it is where module defaults are populated.
pub trait JsonState: Send + 'static {
    type Document: Serialize + DeserializeOwned + Default + Send;

    /// Produce the complete document for the current state. Must not have
    /// side effects.
    fn read(&self) -> Self::Document;

    /// Apply `doc` to `state`. Validate present fields, mutate only when the
    /// document is accepted, and return `Changed` iff an observable field
    /// changed.
    fn update(doc: Self::Document, state: &mut Self, origin_id: &str) -> UpdateResult;
}


/// Assign `value` to `slot` if it differs. Returns whether it changed.
///
/// Helper for updaters that compare field by field.
pub fn assign<V: PartialEq>(slot: &mut V, value: V) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
