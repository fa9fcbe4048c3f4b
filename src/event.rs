use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Kind of a raw change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Structural changes alter the shape of the tree.
    pub fn is_structural(&self) -> bool {
        matches!(self, ChangeKind::Created | ChangeKind::Deleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw change notification from the watcher. A rename arrives as
/// `created` at `path` with `old_path` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub event_type: ChangeKind,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<PathBuf>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub is_directory: bool,
}

impl ChangeEvent {
    pub fn new(event_type: ChangeKind, path: impl Into<PathBuf>, timestamp: u64) -> Self {
        Self {
            event_type,
            path: path.into(),
            old_path: None,
            timestamp,
            is_directory: false,
        }
    }

    pub fn directory(mut self) -> Self {
        self.is_directory = true;
        self
    }

    pub fn renamed_from(mut self, old_path: impl Into<PathBuf>) -> Self {
        self.old_path = Some(old_path.into());
        self
    }
}

/// A deduplicated, collapsed group of events emitted by one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Strictly increasing per normalizer.
    pub sequence: u64,
    pub events: Vec<ChangeEvent>,
}

/// Emitted to UI consumers once a batch has been fully applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeUpdate {
    pub sequence: u64,
    pub events: Vec<ChangeEvent>,
    /// Number of cache entries and snapshots evicted.
    pub invalidated: usize,
    /// Materialized directories whose listing changed.
    pub refreshed_dirs: Vec<PathBuf>,
}
