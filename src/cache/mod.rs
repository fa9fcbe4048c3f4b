//! Memoized directory listings.
//!
//! Root listings and folder listings use distinct key shapes because a root
//! listing may apply different default visibility. The cache is bounded;
//! above capacity the least-recently-used listing is evicted.

mod invalidate;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::fs::node::FileNode;

pub use invalidate::CacheInvalidator;

/// Identity of a memoized listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Root { root: PathBuf, include_hidden: bool },
    Folder { path: PathBuf, include_hidden: bool },
}

impl CacheKey {
    pub fn root(root: impl Into<PathBuf>, include_hidden: bool) -> Self {
        Self::Root {
            root: root.into(),
            include_hidden,
        }
    }

    pub fn folder(path: impl Into<PathBuf>, include_hidden: bool) -> Self {
        Self::Folder {
            path: path.into(),
            include_hidden,
        }
    }

    /// The directory whose children this key lists.
    pub fn directory(&self) -> &Path {
        match self {
            Self::Root { root, .. } => root,
            Self::Folder { path, .. } => path,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root { .. })
    }
}

struct CachedListing {
    nodes: Vec<FileNode>,
    last_access: u64,
}

pub struct DirectoryCache {
    capacity: usize,
    entries: HashMap<CacheKey, CachedListing>,
    clock: u64,
}

impl DirectoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            clock: 0,
        }
    }

    /// Look up a listing, refreshing its recency.
    pub fn get(&mut self, key: &CacheKey) -> Option<Vec<FileNode>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = clock;
            entry.nodes.clone()
        })
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: CacheKey, nodes: Vec<FileNode>) {
        self.clock += 1;
        self.entries.insert(
            key,
            CachedListing {
                nodes,
                last_access: self.clock,
            },
        );
        while self.entries.len() > self.capacity {
            self.evict_lru();
        }
    }

    /// Remove one key. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every key matching `stale`, returning how many went.
    pub fn evict_where<F>(&mut self, mut stale: F) -> usize
    where
        F: FnMut(&CacheKey) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, _| !stale(key));
        before - self.entries.len()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.keys().cloned().collect()
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            tracing::debug!(dir = %key.directory().display(), "evicting listing under LRU pressure");
            self.entries.remove(&key);
        }
    }
}
