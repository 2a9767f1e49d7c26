//! Stateful containers with change notification and batched file persistence.
//!
//! A module's state lives in a [`StatefulService`]. Transports read it and
//! push updates into it; every accepted change is fanned out to registered
//! handlers together with the id of whoever made it. An [`FsPersistence`]
//! binding keeps the state in a JSON file, either writing each change
//! straight away or parking it with a [`BatchCoordinator`] until someone
//! commits (`W`) or cancels (`C`) the whole batch.

pub mod batch;
pub mod config;
pub mod error;
pub mod handlers;
pub mod persistence;
pub mod service;
pub mod storage;
pub mod update;

pub use batch::{BatchCoordinator, BatchOp, FlushReport, PendingWrite};
pub use config::EngineConfig;
pub use error::{Result, StateError};
pub use handlers::HandlerId;
pub use persistence::{DefaultsPolicy, FsPersistence, FsPersistenceBuilder, LoadOutcome};
pub use service::StatefulService;
pub use storage::{FsStorage, MemoryStorage, Storage};
pub use update::{assign, JsonState, UpdateResult, ORIGIN_SERVER};
