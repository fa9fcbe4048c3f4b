use std::path::PathBuf;

use thiserror::Error;

/// Engine-wide result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error types.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A backend listing call failed or the directory is inaccessible.
    #[error("Directory unavailable: {path}: {reason}")]
    DirectoryUnavailable { path: PathBuf, reason: String },

    /// The backend refused to start watching a root.
    #[error("Watcher start failed for {path}: {reason}")]
    WatcherStartFailed { path: PathBuf, reason: String },

    /// The backend failed to stop a running watcher.
    #[error("Watcher stop failed for {path}: {reason}")]
    WatcherStopFailed { path: PathBuf, reason: String },

    /// Stored data could not be decoded.
    #[error("Cache corrupt: {0}")]
    CacheCorrupt(String),

    /// The key-value storage layer failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The directory modification-time probe failed.
    #[error("Probe failed for {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    /// Path is not usable as an engine root or target.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// I/O errors from local filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DirectoryUnavailable { .. } => "DIRECTORY_UNAVAILABLE",
            Self::WatcherStartFailed { .. } => "WATCHER_START_FAILED",
            Self::WatcherStopFailed { .. } => "WATCHER_STOP_FAILED",
            Self::CacheCorrupt(_) => "CACHE_CORRUPT",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Probe { .. } => "PROBE_FAILED",
            Self::InvalidPath(_) => "INVALID_PATH",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }

    /// Whether the engine stays usable after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidPath(_))
    }

    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DirectoryUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
