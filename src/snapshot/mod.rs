//! Persisted point-in-time captures of a root's subtree.
//!
//! One record per root, keyed by a hash of the root path, plus a separate
//! record holding the LRU access order. Storage failures never reach the
//! caller: they are logged and treated as a cache miss.

mod storage;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fs::node::{now_millis, FileNode};

pub use storage::{FileStore, KeyValueStore, MemoryStore};

#[cfg(test)]
pub(crate) use storage::testing;

/// Bump when the serialized layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

const SNAPSHOT_KEY_PREFIX: &str = "snapshot-";
const LRU_ORDER_KEY: &str = "lru-order";

/// Immutable capture of a subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemSnapshot {
    pub version: u32,
    /// Capture time in epoch milliseconds.
    pub timestamp: u64,
    pub root_path: PathBuf,
    pub checksum: String,
    pub nodes: Vec<FileNode>,
}

impl FileSystemSnapshot {
    /// Capture `nodes` under `root_path` now.
    pub fn capture(root_path: PathBuf, nodes: Vec<FileNode>) -> Self {
        Self::capture_at(root_path, nodes, now_millis())
    }

    pub fn capture_at(root_path: PathBuf, mut nodes: Vec<FileNode>, timestamp: u64) -> Self {
        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            version: SNAPSHOT_VERSION,
            timestamp,
            checksum: checksum(&nodes),
            root_path,
            nodes,
        }
    }

    /// Recompute the checksum and compare it with the recorded one.
    pub fn checksum_matches(&self) -> bool {
        checksum(&self.nodes) == self.checksum
    }
}

/// Hash over sorted `(path, last_modified)` pairs.
pub fn checksum(nodes: &[FileNode]) -> String {
    let mut pairs: Vec<(String, u64)> = nodes
        .iter()
        .map(|n| (n.path.to_string_lossy().to_string(), n.last_modified))
        .collect();
    pairs.sort();

    let mut hasher = blake3::Hasher::new();
    for (path, modified) in &pairs {
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(&modified.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Storage key for a root.
pub fn snapshot_key(root: &Path) -> String {
    let hash = blake3::hash(root.to_string_lossy().as_bytes());
    format!("{}{}", SNAPSHOT_KEY_PREFIX, &hash.to_hex()[..16])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSettings {
    /// Maximum number of retained snapshots.
    pub capacity: usize,
    /// Snapshots older than this are stale.
    pub freshness: Duration,
    /// Allowed gap between the root's mtime and the capture time.
    pub mtime_tolerance: Duration,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for SnapshotSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            capacity: config.snapshot_capacity(),
            freshness: Duration::from_secs(config.snapshot_freshness_secs()),
            mtime_tolerance: Duration::from_millis(config.mtime_tolerance_ms()),
        }
    }
}

/// Size-bounded LRU of root snapshots over a [`KeyValueStore`].
pub struct SnapshotStore {
    store: Box<dyn KeyValueStore>,
    settings: SnapshotSettings,
    /// Least recently used first.
    order: Vec<String>,
}

impl SnapshotStore {
    pub fn new(store: Box<dyn KeyValueStore>, settings: SnapshotSettings) -> Self {
        let order = read_order(store.as_ref());
        let mut this = Self {
            store,
            settings,
            order,
        };
        if this.enforce_capacity() {
            this.write_order();
        }
        this
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Roots ordered least recently used first.
    pub fn lru_keys(&self) -> &[String] {
        &self.order
    }

    /// Persist `snapshot`, evicting the least recently used beyond capacity.
    /// Returns `false` when the storage layer refused the write.
    pub fn save(&mut self, snapshot: &FileSystemSnapshot) -> bool {
        let key = snapshot_key(&snapshot.root_path);
        let bytes = match serde_json::to_vec(snapshot) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(root = %snapshot.root_path.display(), error = %e, "failed to encode snapshot");
                return false;
            }
        };
        if let Err(e) = self.store.set(&key, &bytes) {
            tracing::warn!(root = %snapshot.root_path.display(), error = %e, "failed to persist snapshot");
            return false;
        }
        self.touch(&key);
        self.enforce_capacity();
        self.write_order();
        tracing::debug!(root = %snapshot.root_path.display(), nodes = snapshot.nodes.len(), "snapshot saved");
        true
    }

    /// Fetch the snapshot for `root`, refreshing its recency.
    pub fn load(&mut self, root: &Path) -> Option<FileSystemSnapshot> {
        let key = snapshot_key(root);
        match self.read(&key) {
            Ok(Some(snapshot)) if snapshot.root_path == root => {
                self.touch(&key);
                self.write_order();
                Some(snapshot)
            }
            Ok(Some(_)) => {
                tracing::debug!(root = %root.display(), "snapshot key collision, treating as miss");
                None
            }
            Ok(None) => None,
            Err(EngineError::CacheCorrupt(reason)) => {
                tracing::warn!(root = %root.display(), %reason, "discarding corrupt snapshot");
                self.forget(&key);
                None
            }
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "snapshot read failed");
                None
            }
        }
    }

    /// A snapshot is valid when it is fresh and the root's directory mtime
    /// has not moved past the capture time. Any probe failure means invalid.
    pub async fn is_valid<B>(&self, snapshot: &FileSystemSnapshot, root: &Path, backend: &B) -> bool
    where
        B: Backend + ?Sized,
    {
        self.is_valid_at(snapshot, root, backend, now_millis()).await
    }

    pub async fn is_valid_at<B>(
        &self,
        snapshot: &FileSystemSnapshot,
        root: &Path,
        backend: &B,
        now: u64,
    ) -> bool
    where
        B: Backend + ?Sized,
    {
        if snapshot.root_path != root || snapshot.version != SNAPSHOT_VERSION {
            return false;
        }

        let age = now.saturating_sub(snapshot.timestamp);
        if age >= self.settings.freshness.as_millis() as u64 {
            tracing::debug!(root = %root.display(), age_ms = age, "snapshot expired");
            return false;
        }

        let probe = match backend.get_directory_mtime(root).await {
            Ok(probe) if probe.success => probe,
            Ok(_) => {
                tracing::debug!(root = %root.display(), "mtime probe unsuccessful");
                return false;
            }
            Err(e) => {
                tracing::debug!(root = %root.display(), error = %e, "mtime probe failed");
                return false;
            }
        };

        let tolerance = self.settings.mtime_tolerance.as_millis() as u64;
        let valid = probe.mtime <= snapshot.timestamp.saturating_add(tolerance);
        if !valid {
            tracing::debug!(root = %root.display(), mtime = probe.mtime, captured = snapshot.timestamp, "root modified since capture");
        }
        valid
    }

    /// Drop every snapshot. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let mut keys = std::mem::take(&mut self.order);
        if let Ok(stored) = self.store.keys() {
            for key in stored {
                if key.starts_with(SNAPSHOT_KEY_PREFIX) && !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        for key in &keys {
            if let Err(e) = self.store.delete(key) {
                tracing::warn!(%key, error = %e, "failed to delete snapshot");
            }
        }
        if let Err(e) = self.store.delete(LRU_ORDER_KEY) {
            tracing::warn!(error = %e, "failed to delete snapshot order");
        }
        keys.len()
    }

    /// Drop snapshots whose root matches `stale`. Unreadable records go too.
    pub fn evict_where<F>(&mut self, mut stale: F) -> usize
    where
        F: FnMut(&Path) -> bool,
    {
        let mut doomed = Vec::new();
        for key in &self.order {
            match self.read(key) {
                Ok(Some(snapshot)) if !stale(&snapshot.root_path) => {}
                _ => doomed.push(key.clone()),
            }
        }
        for key in &doomed {
            self.forget(key);
        }
        doomed.len()
    }

    fn read(&self, key: &str) -> Result<Option<FileSystemSnapshot>> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        let snapshot: FileSystemSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::CacheCorrupt(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::CacheCorrupt(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push(key.to_string());
    }

    fn forget(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        if let Err(e) = self.store.delete(key) {
            tracing::warn!(%key, error = %e, "failed to delete snapshot");
        }
        self.write_order();
    }

    /// Returns whether anything was evicted.
    fn enforce_capacity(&mut self) -> bool {
        let before = self.order.len();
        while self.order.len() > self.settings.capacity {
            let evicted = self.order.remove(0);
            tracing::debug!(key = %evicted, "evicting least recently used snapshot");
            if let Err(e) = self.store.delete(&evicted) {
                tracing::warn!(key = %evicted, error = %e, "failed to delete snapshot");
            }
        }
        self.order.len() != before
    }

    fn write_order(&mut self) {
        let bytes = match serde_json::to_vec(&self.order) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode snapshot order");
                return;
            }
        };
        if let Err(e) = self.store.set(LRU_ORDER_KEY, &bytes) {
            tracing::warn!(error = %e, "failed to persist snapshot order");
        }
    }
}

/// Read the persisted access order, rebuilding it from stored keys when the
/// record is missing or unreadable.
fn read_order(store: &dyn KeyValueStore) -> Vec<String> {
    match store.get(LRU_ORDER_KEY) {
        Ok(Some(bytes)) => match serde_json::from_slice::<Vec<String>>(&bytes) {
            Ok(order) => return order,
            Err(e) => tracing::warn!(error = %e, "snapshot order corrupt, rebuilding"),
        },
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(error = %e, "snapshot order unreadable");
            return Vec::new();
        }
    }
    let mut keys: Vec<String> = store
        .keys()
        .unwrap_or_default()
        .into_iter()
        .filter(|k| k.starts_with(SNAPSHOT_KEY_PREFIX))
        .collect();
    keys.sort();
    keys
}
