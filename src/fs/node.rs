use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Length (hex chars) of a node id.
const NODE_ID_LEN: usize = 16;

/// One directory entry as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub path: PathBuf,
    pub name: String,
    pub depth: usize,
    pub size: Option<u64>,
    pub last_modified: u64,
    pub extension: Option<String>,
    pub is_directory: bool,
}

/// A filesystem entry as known to the client.
///
/// `children` is never populated eagerly: `None` means "not loaded yet",
/// not "empty".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: String,
    pub path: PathBuf,
    pub name: String,
    pub extension: Option<String>,
    /// Distance from the root; direct children of the root have depth 0.
    pub depth: usize,
    pub is_directory: bool,
    /// Always `None` for directories.
    pub size: Option<u64>,
    /// Milliseconds since the Unix epoch.
    pub last_modified: u64,
    pub has_children: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    /// Wrap a backend record. `depth` overrides the backend-reported depth
    /// when the caller knows the parent's position.
    pub fn from_raw(raw: RawEntry, depth: Option<usize>) -> Self {
        let path = normalize_path(&raw.path);
        let extension = raw.extension.or_else(|| extension_of(&path));
        Self {
            id: node_id(&path),
            name: raw.name,
            extension,
            depth: depth.unwrap_or(raw.depth),
            size: if raw.is_directory { None } else { raw.size },
            last_modified: raw.last_modified,
            has_children: raw.is_directory,
            is_directory: raw.is_directory,
            children: None,
            path,
        }
    }

    /// Build a node for a path only known from a change notification.
    pub fn from_event(path: &Path, root: &Path, is_directory: bool, timestamp: u64) -> Self {
        let path = normalize_path(path);
        Self {
            id: node_id(&path),
            name: file_name_of(&path),
            extension: if is_directory { None } else { extension_of(&path) },
            depth: depth_below(root, &path).unwrap_or(0),
            is_directory,
            size: None,
            last_modified: timestamp,
            has_children: is_directory,
            children: None,
            path,
        }
    }

    /// Re-home this node under `to`, keeping its metadata.
    pub fn relocated(&self, to: &Path) -> Self {
        let path = normalize_path(to);
        let depth_delta = path.components().count() as isize
            - self.path.components().count() as isize;
        Self {
            id: node_id(&path),
            name: file_name_of(&path),
            extension: if self.is_directory {
                None
            } else {
                extension_of(&path)
            },
            depth: (self.depth as isize + depth_delta).max(0) as usize,
            path,
            ..self.clone()
        }
    }
}

/// Stable opaque id for a path. Same path, same id.
pub fn node_id(path: &Path) -> String {
    let hash = blake3::hash(path.to_string_lossy().as_bytes());
    let mut id = hex::encode(hash.as_bytes());
    id.truncate(NODE_ID_LEN);
    id
}

/// Lexically normalize a path: drop `.` segments, fold `..` and trailing
/// separators. Never touches the disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Depth of `path` relative to `root` (root's direct children are 0).
/// `None` when `path` is not strictly below `root`.
pub fn depth_below(root: &Path, path: &Path) -> Option<usize> {
    let rel = path.strip_prefix(root).ok()?;
    let count = rel.components().count();
    if count == 0 {
        None
    } else {
        Some(count - 1)
    }
}

/// Whether `path` equals `base` or lives below it, segment-wise.
pub fn is_within(path: &Path, base: &Path) -> bool {
    path.starts_with(base)
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_string())
}

/// Milliseconds since the Unix epoch for a `SystemTime`.
pub fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    millis_since_epoch(SystemTime::now())
}

/// Display order: directories first, then by name, path as tie-breaker.
pub fn display_order(a: &FileNode, b: &FileNode) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.path.cmp(&b.path))
}
