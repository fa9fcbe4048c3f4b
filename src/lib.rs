//! Incremental file-tree cache and live synchronization.
//!
//! A [`TreeEngine`] mirrors a directory hierarchy served by a [`Backend`],
//! hands it out one level at a time, and keeps it consistent as change
//! notifications arrive.

pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fs;
pub mod loader;
pub mod logging;
pub mod normalizer;
pub mod snapshot;

pub use backend::{Backend, LocalBackend, LocalBackendSettings};
pub use config::EngineConfig;
pub use engine::TreeEngine;
pub use error::{EngineError, Result};
pub use event::{ChangeEvent, ChangeKind, TreeUpdate};
pub use fs::diff::{apply, FileSystemDiff, MovedEntry};
pub use fs::node::FileNode;
pub use snapshot::{FileStore, FileSystemSnapshot, KeyValueStore, MemoryStore};
