//! Lazy, memoized directory listings.
//!
//! The loader never recurses on its own: a root or folder request returns
//! one level of children. [`ScanCursor`] is the explicit bulk walk used to
//! build snapshots.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::Backend;
use crate::cache::{CacheKey, DirectoryCache};
use crate::error::{EngineError, Result};
use crate::fs::node::{depth_below, display_order, normalize_path, FileNode, RawEntry};

pub struct DirectoryLoader<B: Backend + ?Sized> {
    backend: Arc<B>,
    cache: DirectoryCache,
    /// Last root handed to `load_root`; used to recompute depths.
    root: Option<PathBuf>,
}

impl<B: Backend + ?Sized> DirectoryLoader<B> {
    pub fn new(backend: Arc<B>, cache_capacity: usize) -> Self {
        Self {
            backend,
            cache: DirectoryCache::new(cache_capacity),
            root: None,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut DirectoryCache {
        &mut self.cache
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Direct children of `root`. Also makes `root` the reference point for
    /// depths of later folder loads.
    pub async fn load_root(&mut self, root: &Path, include_hidden: bool) -> Result<Vec<FileNode>> {
        let root = normalize_path(root);
        self.root = Some(root.clone());

        let key = CacheKey::root(root.clone(), include_hidden);
        if let Some(nodes) = self.cache.get(&key) {
            tracing::debug!(path = %root.display(), count = nodes.len(), "root listing cache hit");
            return Ok(nodes);
        }

        tracing::debug!(path = %root.display(), "root listing cache miss");
        let raw = self
            .backend
            .load_root_items(&root, include_hidden)
            .await
            .map_err(|e| unavailable(&root, e))?;
        let nodes = wrap(raw, Some(&root));
        self.cache.insert(key, nodes.clone());
        Ok(nodes)
    }

    /// Direct children of `folder`.
    pub async fn load_folder(&mut self, folder: &Path, include_hidden: bool) -> Result<Vec<FileNode>> {
        let folder = normalize_path(folder);
        let key = CacheKey::folder(folder.clone(), include_hidden);
        if let Some(nodes) = self.cache.get(&key) {
            tracing::debug!(path = %folder.display(), count = nodes.len(), "folder listing cache hit");
            return Ok(nodes);
        }

        tracing::debug!(path = %folder.display(), "folder listing cache miss");
        let raw = self
            .backend
            .load_folder_contents(&folder, include_hidden)
            .await
            .map_err(|e| unavailable(&folder, e))?;
        let nodes = wrap(raw, self.root.as_deref());
        self.cache.insert(key, nodes.clone());
        Ok(nodes)
    }

    /// Start a fresh breadth-first walk below `root`. Bypasses the cache.
    pub fn scan(&self, root: &Path, include_hidden: bool) -> ScanCursor<B> {
        ScanCursor::new(Arc::clone(&self.backend), root, include_hidden)
    }
}

/// Pull-based recursive walk yielding one directory's children per step.
///
/// Finite and not restartable; rescanning means building a new cursor. A
/// failing root ends the walk with that error. Failing subdirectories are
/// logged and skipped.
pub struct ScanCursor<B: Backend + ?Sized> {
    backend: Arc<B>,
    root: PathBuf,
    include_hidden: bool,
    pending: VecDeque<PathBuf>,
    started: bool,
    finished: bool,
    skipped: Vec<PathBuf>,
}

impl<B: Backend + ?Sized> ScanCursor<B> {
    pub fn new(backend: Arc<B>, root: &Path, include_hidden: bool) -> Self {
        Self {
            backend,
            root: normalize_path(root),
            include_hidden,
            pending: VecDeque::new(),
            started: false,
            finished: false,
            skipped: Vec::new(),
        }
    }

    /// Subdirectories that could not be listed so far.
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    pub async fn next(&mut self) -> Option<Result<Vec<FileNode>>> {
        if self.finished {
            return None;
        }

        if !self.started {
            self.started = true;
            return match self
                .backend
                .load_root_items(&self.root, self.include_hidden)
                .await
            {
                Ok(raw) => Some(Ok(self.enqueue(raw))),
                Err(e) => {
                    self.finished = true;
                    Some(Err(unavailable(&self.root, e)))
                }
            };
        }

        while let Some(dir) = self.pending.pop_front() {
            match self
                .backend
                .load_folder_contents(&dir, self.include_hidden)
                .await
            {
                Ok(raw) => return Some(Ok(self.enqueue(raw))),
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "skipping inaccessible directory");
                    self.skipped.push(dir);
                }
            }
        }

        self.finished = true;
        None
    }

    /// Drain the cursor into one flat collection.
    pub async fn collect_all(mut self) -> Result<Vec<FileNode>> {
        let mut all = Vec::new();
        while let Some(batch) = self.next().await {
            all.extend(batch?);
        }
        Ok(all)
    }

    fn enqueue(&mut self, raw: Vec<RawEntry>) -> Vec<FileNode> {
        let nodes = wrap(raw, Some(&self.root));
        self.pending.extend(
            nodes
                .iter()
                .filter(|n| n.is_directory)
                .map(|n| n.path.clone()),
        );
        nodes
    }
}

fn wrap(raw: Vec<RawEntry>, root: Option<&Path>) -> Vec<FileNode> {
    let mut nodes: Vec<FileNode> = raw
        .into_iter()
        .map(|entry| {
            let depth = root.and_then(|r| depth_below(r, &normalize_path(&entry.path)));
            FileNode::from_raw(entry, depth)
        })
        .collect();
    nodes.sort_by(display_order);
    nodes
}

fn unavailable(path: &Path, err: EngineError) -> EngineError {
    match err {
        EngineError::DirectoryUnavailable { .. } => err,
        other => EngineError::unavailable(path, other),
    }
}
