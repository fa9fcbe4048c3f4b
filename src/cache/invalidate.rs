use std::path::Path;

use super::{CacheKey, DirectoryCache};
use crate::config::DEFAULT_ROOT_INVALIDATION_DEPTH;
use crate::fs::node::is_within;
use crate::snapshot::SnapshotStore;

/// Decides which listings and snapshots a change makes stale, and evicts them.
#[derive(Debug, Clone, Copy)]
pub struct CacheInvalidator {
    /// How many segments below a root a change may sit and still refresh the
    /// root listing. A tunable heuristic, not a contract.
    root_depth: usize,
}

impl Default for CacheInvalidator {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_INVALIDATION_DEPTH)
    }
}

impl CacheInvalidator {
    pub fn new(root_depth: usize) -> Self {
        Self { root_depth }
    }

    /// Evict stale entries. `None` clears everything.
    ///
    /// Idempotent: a second call with the same path evicts nothing more.
    /// Returns the number of listings plus snapshots evicted.
    pub fn invalidate(
        &self,
        cache: &mut DirectoryCache,
        snapshots: &mut SnapshotStore,
        path: Option<&Path>,
    ) -> usize {
        let Some(path) = path else {
            let listings = cache.clear();
            let snaps = snapshots.clear();
            tracing::info!(listings, snapshots = snaps, "cleared all cached listings");
            return listings + snaps;
        };

        let listings = cache.evict_where(|key| self.is_stale(key, path));
        let snaps = snapshots.evict_where(|root| is_within(path, root) || is_within(root, path));
        if listings + snaps > 0 {
            tracing::debug!(path = %path.display(), listings, snapshots = snaps, "invalidated");
        }
        listings + snaps
    }

    /// Whether a change at `path` makes the listing under `key` stale.
    pub fn is_stale(&self, key: &CacheKey, path: &Path) -> bool {
        let dir = key.directory();
        match key {
            CacheKey::Folder { .. } => is_within(path, dir) || is_within(dir, path),
            CacheKey::Root { .. } => {
                if is_within(dir, path) {
                    return true;
                }
                match path.strip_prefix(dir) {
                    Ok(rel) => rel.components().count() <= self.root_depth,
                    Err(_) => false,
                }
            }
        }
    }
}
