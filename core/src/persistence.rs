//! File persistence for a stateful container.
//!
//! `FsPersistence<T>` binds one `StatefulService<T>` to one storage path. It
//! hydrates the container at startup and subscribes to it, so every
//! propagated change is written back: immediately, or in delayed mode by
//! queueing a single coalesced entry with a `BatchCoordinator` that later
//! commits or cancels it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use serde_json::Value;

use crate::batch::{BatchCoordinator, BatchOp, PendingWrite};
use crate::error::{Result, StateError};
use crate::handlers::HandlerId;
use crate::service::StatefulService;
use crate::storage::Storage;
use crate::update::{JsonState, UpdateResult, ORIGIN_SERVER};

/// Populates module defaults when there is no usable stored document.
pub type DefaultsPolicy<T> = Arc<dyn Fn(&mut T) + Send + Sync>;


/// How `load_from_storage` got its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The stored document was applied.
    Loaded,
    /// The file was missing or malformed; defaults were applied and written.
    Defaulted,
}


// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct FsPersistenceBuilder<T: JsonState> {
    service: StatefulService<T>,
    storage: Arc<dyn Storage>,
    path: String,
    coordinator: Option<BatchCoordinator>,
    defaults: Option<DefaultsPolicy<T>>,
    pretty: bool,
}

impl<T: JsonState> FsPersistenceBuilder<T> {
    /// Defer writes until `coordinator` commits them.
    pub fn delayed(mut self, coordinator: &BatchCoordinator) -> Self {
        self.coordinator = Some(coordinator.clone());
        self
    }

    /// Replace the default policy (the updater applied to an empty document).
    pub fn defaults<F>(mut self, policy: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.defaults = Some(Arc::new(policy));
        self
    }

    /// Pretty-print stored documents.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Create the binding and subscribe it to the container.
    pub fn build(self) -> FsPersistence<T> {
        let defaults = self.defaults.unwrap_or_else(|| {
            Arc::new(|state: &mut T| {
                T::update(T::Document::default(), state, ORIGIN_SERVER);
            })
        });
        let binding = Arc::new(Binding {
            service: self.service,
            storage: self.storage,
            path: self.path,
            coordinator: self.coordinator,
            defaults,
            pretty: self.pretty,
            has_delayed_write: AtomicBool::new(false),
            rolling_back_on: Mutex::new(None),
            handler_id: Mutex::new(None),
        });
        binding.enable_update_handler();
        FsPersistence { binding }
    }
}


// ---------------------------------------------------------------------------
// FsPersistence
// ---------------------------------------------------------------------------

/// Persistence binding between a container and a file.
pub struct FsPersistence<T: JsonState> {
    binding: Arc<Binding<T>>,
}

impl<T: JsonState> FsPersistence<T> {
    /// Immediate-mode binding with default settings.
    pub fn new(
        service: StatefulService<T>,
        storage: Arc<dyn Storage>,
        path: impl Into<String>,
    ) -> Self {
        Self::builder(service, storage, path).build()
    }

    pub fn builder(
        service: StatefulService<T>,
        storage: Arc<dyn Storage>,
        path: impl Into<String>,
    ) -> FsPersistenceBuilder<T> {
        FsPersistenceBuilder {
            service,
            storage,
            path: path.into(),
            coordinator: None,
            defaults: None,
            pretty: false,
        }
    }

    /// Hydrate the container from its file without notifying anyone.
    ///
    /// A missing or malformed file is not an error: defaults are applied and
    /// written back before this returns, so generated defaults stay stable
    /// across restarts. A file that exists but cannot be read is reported as
    /// `StateError::Io` and left alone, as is a failing write-back.
    pub fn load_from_storage(&self) -> Result<LoadOutcome> {
        self.binding.load_from_storage()
    }

    /// Serialize the current state and write it now, creating missing
    /// parent directories.
    pub fn write_now(&self) -> Result<()> {
        self.binding.write_now()
    }

    /// Write now, or in delayed mode queue one pending entry for this
    /// binding if none is queued yet.
    pub fn write_deferred(&self) -> Result<()> {
        self.binding.write_deferred()
    }

    /// Stop writing on container changes.
    pub fn disable_update_handler(&self) {
        self.binding.disable_update_handler();
    }

    /// Resume writing on container changes.
    pub fn enable_update_handler(&self) {
        self.binding.enable_update_handler();
    }

    /// Whether a delayed write is waiting for a batch signal.
    pub fn is_dirty(&self) -> bool {
        self.binding.has_delayed_write.load(Ordering::SeqCst)
    }

    pub fn is_delayed(&self) -> bool {
        self.binding.coordinator.is_some()
    }

    pub fn path(&self) -> &str {
        &self.binding.path
    }

    pub fn service(&self) -> &StatefulService<T> {
        &self.binding.service
    }
}

impl<T: JsonState> Drop for FsPersistence<T> {
    fn drop(&mut self) {
        self.binding.disable_update_handler();
    }
}


struct Binding<T: JsonState> {
    service: StatefulService<T>,
    storage: Arc<dyn Storage>,
    path: String,
    coordinator: Option<BatchCoordinator>,
    defaults: DefaultsPolicy<T>,
    pretty: bool,
    has_delayed_write: AtomicBool,
    /// Thread currently sending the post-cancel notification.
    rolling_back_on: Mutex<Option<ThreadId>>,
    handler_id: Mutex<Option<HandlerId>>,
}

impl<T: JsonState> Binding<T> {
    fn load_from_storage(&self) -> Result<LoadOutcome> {
        if let Some(doc) = self.stored_document()? {
            let result = self.service.update_document_without_propagation(doc);
            if result == UpdateResult::Error {
                tracing::warn!(path = %self.path, "stored document rejected by updater");
            }
            tracing::debug!(path = %self.path, "state loaded");
            return Ok(LoadOutcome::Loaded);
        }

        let defaults = Arc::clone(&self.defaults);
        self.service.update_without_propagation(|state| {
            defaults(state);
            UpdateResult::Changed
        });
        self.write_now()?;
        tracing::debug!(path = %self.path, "defaults applied and persisted");
        Ok(LoadOutcome::Defaulted)
    }

    /// The stored document, if the file exists and holds a JSON object that
    /// fits the module's schema. Fails only when the file cannot be read.
    fn stored_document(&self) -> Result<Option<T::Document>> {
        let Some(bytes) = self
            .storage
            .read(&self.path)
            .map_err(|e| StateError::io(&self.path, e))?
        else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice::<Value>(&bytes).and_then(|value| {
            if value.is_object() {
                serde_json::from_value::<T::Document>(value).map(Some)
            } else {
                Ok(None)
            }
        });
        Ok(match parsed {
            Ok(Some(doc)) => Some(doc),
            Ok(None) => {
                tracing::warn!(path = %self.path, "state file is not a JSON object");
                None
            }
            Err(source) => {
                let e = StateError::Parse {
                    path: self.path.clone(),
                    source,
                };
                tracing::warn!(error = %e, "malformed state file");
                None
            }
        })
    }

    fn write_now(&self) -> Result<()> {
        let doc = self.service.read_document();
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(&doc)
        } else {
            serde_json::to_vec(&doc)
        };
        let bytes = encoded.map_err(|source| StateError::Serialize {
            path: self.path.clone(),
            source,
        })?;

        self.mkdirs()?;
        self.storage
            .write(&self.path, &bytes)
            .map_err(|e| StateError::io(&self.path, e))?;
        tracing::debug!(path = %self.path, bytes = bytes.len(), "state written");
        Ok(())
    }

    /// Create each missing ancestor of the path: `/a/b/c` needs `/a` and
    /// `/a/b`.
    fn mkdirs(&self) -> Result<()> {
        let boundaries = self
            .path
            .char_indices()
            .filter(|&(idx, c)| c == '/' && idx > 0)
            .map(|(idx, _)| idx);
        for idx in boundaries {
            let segment = &self.path[..idx];
            if !self.storage.exists(segment) {
                self.storage
                    .mkdir(segment)
                    .map_err(|e| StateError::io(segment, e))?;
            }
        }
        Ok(())
    }

    fn write_deferred(self: &Arc<Self>) -> Result<()> {
        let Some(coordinator) = &self.coordinator else {
            return self.write_now();
        };
        if *self.rolling_back_on.lock() == Some(thread::current().id()) {
            return Ok(());
        }
        if !self.has_delayed_write.swap(true, Ordering::SeqCst) {
            let binding = Arc::clone(self);
            coordinator.register(PendingWrite::new(self.path.clone(), move |op| {
                binding.finish_delayed(op)
            }));
        }
        Ok(())
    }

    fn finish_delayed(&self, op: BatchOp) -> Result<()> {
        // Cleared before the state is read, so a change landing while this
        // entry runs queues a fresh one for the next batch.
        self.has_delayed_write.store(false, Ordering::SeqCst);
        match op {
            BatchOp::Commit => self.write_now(),
            BatchOp::Cancel => self.roll_back(),
        }
    }

    /// Reload from what is on disk and tell observers the state changed.
    ///
    /// The notification re-enters `write_deferred` on this thread; that call
    /// is skipped so the reverted state is not queued for writing.
    fn roll_back(&self) -> Result<()> {
        let loaded = self.load_from_storage();
        *self.rolling_back_on.lock() = Some(thread::current().id());
        self.service.update(|_| UpdateResult::Changed, ORIGIN_SERVER);
        *self.rolling_back_on.lock() = None;
        loaded.map(|_| ())
    }

    fn enable_update_handler(self: &Arc<Self>) {
        let mut slot = self.handler_id.lock();
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let id = self.service.add_update_handler(move |origin_id| {
            let Some(binding) = weak.upgrade() else {
                return;
            };
            if let Err(e) = binding.write_deferred() {
                tracing::warn!(origin_id, error = %e, "auto-save failed");
            }
        });
        *slot = Some(id);
    }

    fn disable_update_handler(&self) {
        if let Some(id) = self.handler_id.lock().take() {
            self.service.remove_update_handler(id);
        }
    }
}
