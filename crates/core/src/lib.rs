//! yaks core library.
//!
//! A hierarchical task tracker whose tree lives in plain directories and is
//! shared between collaborators through git refs and objects. This crate
//! holds the task store, the snapshot/divergence/merge machinery, the sync
//! orchestrator and the command semantics; the `yx` binary is a thin shell
//! over [`app::YakApp`].

pub mod app;
pub mod backend;
pub mod config;
pub mod divergence;
pub mod errors;
pub mod fs_tree;
pub mod merge;
pub mod models;
pub mod snapshot;
pub mod store;
pub mod sync_engine;

// Re-exports for convenience.
pub use app::{Audited, CommandLog, YakApp};
pub use backend::{GitBackend, MemoryBackend, SyncBackend};
pub use config::YaksConfig;
pub use errors::{CoreError, ErrorClass};
pub use models::{Task, TaskState};
pub use store::{FsTaskStore, TaskStore};
pub use sync_engine::{SyncEngine, SyncReport, SyncSettings};
