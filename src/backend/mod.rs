//! The backend RPC surface the engine consumes.
//!
//! A backend performs the actual filesystem I/O and watching. The engine only
//! talks to it through [`Backend`]; change notifications arrive separately on
//! the event channel the backend was created with.

mod local;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fs::node::RawEntry;

pub use local::{LocalBackend, LocalBackendSettings};

/// Result of a directory modification-time probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtimeProbe {
    /// Milliseconds since the Unix epoch.
    pub mtime: u64,
    pub success: bool,
}

/// Result of a size- and encoding-aware file read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartRead {
    pub content: Option<String>,
    pub size: u64,
    pub is_binary: bool,
    pub is_too_large: bool,
    pub should_use_hex_mode: bool,
    pub warning: Option<String>,
}

/// Handle for a running watch subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatcherId(pub u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher-{}", self.0)
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Direct children of `root` (depth 0).
    async fn load_root_items(&self, root: &Path, include_hidden: bool) -> Result<Vec<RawEntry>>;

    /// Direct children of `folder`.
    async fn load_folder_contents(
        &self,
        folder: &Path,
        include_hidden: bool,
    ) -> Result<Vec<RawEntry>>;

    async fn get_directory_mtime(&self, path: &Path) -> Result<MtimeProbe>;

    async fn start_file_watcher(&self, path: &Path) -> Result<WatcherId>;

    async fn stop_file_watcher(&self, id: WatcherId) -> Result<()>;

    async fn read_file_smart(&self, path: &Path) -> Result<SmartRead>;

    async fn write_file(&self, path: &Path, content: &str) -> Result<()>;
}
