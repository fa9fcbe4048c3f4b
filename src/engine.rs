//! The engine handle: owns the caches, the snapshot store and the watch
//! subscription, and routes normalized change batches into invalidation and
//! the materialized views the UI is showing.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::backend::{Backend, SmartRead, WatcherId};
use crate::cache::CacheInvalidator;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::{ChangeBatch, ChangeEvent, ChangeKind, TreeUpdate};
use crate::fs::diff::{self, FileSystemDiff};
use crate::fs::node::{file_name_of, is_within, normalize_path, FileNode};
use crate::loader::{DirectoryLoader, ScanCursor};
use crate::normalizer::{Admission, ChangeNormalizer, NormalizerSettings};
use crate::snapshot::{FileSystemSnapshot, KeyValueStore, SnapshotSettings, SnapshotStore};

struct ActiveWatch {
    root: PathBuf,
    id: WatcherId,
}

pub struct TreeEngine<B: Backend + ?Sized> {
    loader: DirectoryLoader<B>,
    snapshots: SnapshotStore,
    invalidator: CacheInvalidator,
    normalizer: ChangeNormalizer,
    /// Listings currently expanded in the UI, by directory.
    materialized: HashMap<PathBuf, Vec<FileNode>>,
    /// Open views whose directory changed wholesale; reloaded from the backend.
    stale: BTreeSet<PathBuf>,
    watch: Option<ActiveWatch>,
    show_hidden: bool,
}

impl<B: Backend + ?Sized> TreeEngine<B> {
    pub fn new(backend: Arc<B>, store: Box<dyn KeyValueStore>, config: &EngineConfig) -> Self {
        Self {
            loader: DirectoryLoader::new(backend, config.cache_capacity()),
            snapshots: SnapshotStore::new(store, SnapshotSettings::from(config)),
            invalidator: CacheInvalidator::new(config.root_invalidation_depth()),
            normalizer: ChangeNormalizer::new(NormalizerSettings::from(config)),
            materialized: HashMap::new(),
            stale: BTreeSet::new(),
            watch: None,
            show_hidden: config.show_hidden(),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        self.loader.backend()
    }

    pub fn root(&self) -> Option<&Path> {
        self.loader.root()
    }

    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    /// Change visibility. Listings are keyed by it, so nothing is evicted;
    /// materialized views are dropped because they were loaded with the old flag.
    pub fn set_show_hidden(&mut self, show_hidden: bool) {
        if self.show_hidden != show_hidden {
            self.show_hidden = show_hidden;
            self.materialized.clear();
        }
    }

    pub fn watched_root(&self) -> Option<&Path> {
        self.watch.as_ref().map(|w| w.root.as_path())
    }

    pub fn is_watching(&self) -> bool {
        self.watch.is_some()
    }

    pub fn pending_events(&self) -> usize {
        self.normalizer.pending_len()
    }

    /// The materialized listing of `dir`, if it is expanded.
    pub fn materialized(&self, dir: &Path) -> Option<&[FileNode]> {
        self.materialized.get(dir).map(Vec::as_slice)
    }

    /// Open views waiting for [`TreeEngine::reload_stale`].
    pub fn stale_views(&self) -> Vec<PathBuf> {
        self.stale.iter().cloned().collect()
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn cached_listings(&self) -> usize {
        self.loader.cache().len()
    }

    pub async fn load_root(&mut self, root: &Path) -> Result<Vec<FileNode>> {
        let root = normalize_path(root);
        if self.loader.root() != Some(root.as_path()) {
            self.materialized.clear();
        }
        let nodes = self.loader.load_root(&root, self.show_hidden).await?;
        self.materialized.insert(root, nodes.clone());
        Ok(nodes)
    }

    /// Expand `folder`: one backend call at most, never recursive.
    pub async fn load_folder(&mut self, folder: &Path) -> Result<Vec<FileNode>> {
        let folder = normalize_path(folder);
        let nodes = self.loader.load_folder(&folder, self.show_hidden).await?;
        self.materialized.insert(folder, nodes.clone());
        Ok(nodes)
    }

    /// Forget the materialized view of `folder` and everything below it.
    pub fn collapse(&mut self, folder: &Path) {
        let folder = normalize_path(folder);
        self.materialized.retain(|dir, _| !is_within(dir, &folder));
    }

    /// Evict listings and snapshots made stale by a change at `path`, or
    /// everything when `path` is `None`.
    pub fn invalidate(&mut self, path: Option<&Path>) -> usize {
        self.invalidator
            .invalidate(self.loader.cache_mut(), &mut self.snapshots, path)
    }

    /// A valid stored snapshot of `root`, or a fresh full scan.
    pub async fn snapshot_root(&mut self, root: &Path, force_rescan: bool) -> Result<FileSystemSnapshot> {
        let root = normalize_path(root);
        let backend = Arc::clone(self.loader.backend());

        if !force_rescan {
            if let Some(snapshot) = self.snapshots.load(&root) {
                if self.snapshots.is_valid(&snapshot, &root, backend.as_ref()).await {
                    tracing::debug!(root = %root.display(), nodes = snapshot.nodes.len(), "using cached snapshot");
                    return Ok(snapshot);
                }
                tracing::debug!(root = %root.display(), "cached snapshot failed validation, rescanning");
            }
        }

        let nodes = ScanCursor::new(backend, &root, self.show_hidden)
            .collect_all()
            .await?;
        let snapshot = FileSystemSnapshot::capture(root.clone(), nodes);
        self.snapshots.save(&snapshot);
        tracing::info!(root = %root.display(), nodes = snapshot.nodes.len(), "captured snapshot");
        Ok(snapshot)
    }

    /// Watch `root`, replacing any previous subscription. Pending events for
    /// the previous root are discarded. On failure the engine keeps serving
    /// listings without live updates.
    pub async fn start_watching(&mut self, root: &Path) -> Result<WatcherId> {
        let root = normalize_path(root);
        if let Some(active) = &self.watch {
            if active.root == root {
                return Ok(active.id);
            }
        }

        if let Err(e) = self.stop_watching().await {
            tracing::warn!(error = %e, "previous watcher did not stop cleanly");
        }

        match self.loader.backend().start_file_watcher(&root).await {
            Ok(id) => {
                tracing::info!(root = %root.display(), %id, "watching");
                self.watch = Some(ActiveWatch { root, id });
                Ok(id)
            }
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "live updates unavailable");
                Err(match e {
                    EngineError::WatcherStartFailed { .. } => e,
                    other => EngineError::WatcherStartFailed {
                        path: root,
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Stop the active subscription, if any, discarding unflushed events.
    pub async fn stop_watching(&mut self) -> Result<()> {
        self.normalizer.cancel();
        let Some(active) = self.watch.take() else {
            return Ok(());
        };
        self.loader
            .backend()
            .stop_file_watcher(active.id)
            .await
            .map_err(|e| match e {
                EngineError::WatcherStopFailed { .. } => e,
                other => EngineError::WatcherStopFailed {
                    path: active.root.clone(),
                    reason: other.to_string(),
                },
            })?;
        tracing::info!(root = %active.root.display(), id = %active.id, "stopped watching");
        Ok(())
    }

    /// Feed one raw notification to the normalizer. Returns `false` when it
    /// was dropped, either out of scope or as a duplicate.
    pub fn handle_event(&mut self, event: ChangeEvent) -> bool {
        if !self.in_scope(&event) {
            tracing::trace!(path = %event.path.display(), "event outside watched root dropped");
            return false;
        }
        let now = Instant::now().into_std();
        self.normalizer.push(event, now) == Admission::Accepted
    }

    /// Emit and apply whatever is pending without waiting for the timer.
    /// Views marked stale stay so until [`TreeEngine::reload_stale`].
    pub fn flush(&mut self) -> Option<TreeUpdate> {
        self.normalizer.flush().map(|batch| self.process_batch(batch))
    }

    /// Wait for the next applied batch.
    ///
    /// Events are taken from `rx` until the flush deadline passes; the batch
    /// is then fully applied before this returns. Returns `None` once the
    /// channel is closed and nothing remains buffered.
    pub async fn next_update(&mut self, rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> Option<TreeUpdate> {
        loop {
            let deadline = self.normalizer.deadline();
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(Instant::from_std(at)).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                received = rx.recv() => match received {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => {
                        let update = self.flush();
                        self.reload_stale().await;
                        return update;
                    }
                },
                _ = timer => {
                    let now = Instant::now().into_std();
                    if let Some(batch) = self.normalizer.poll(now) {
                        let update = self.process_batch(batch);
                        self.reload_stale().await;
                        return Some(update);
                    }
                }
            }
        }
    }

    /// Route one batch: invalidate every touched path, then patch the
    /// materialized listings.
    pub fn process_batch(&mut self, batch: ChangeBatch) -> TreeUpdate {
        let mut invalidated = 0;
        for event in &batch.events {
            invalidated += self.invalidate(Some(&event.path));
            if let Some(old) = &event.old_path {
                invalidated += self.invalidate(Some(old));
            }
        }

        let refreshed_dirs = self.apply_to_materialized(&batch.events);
        tracing::debug!(
            sequence = batch.sequence,
            events = batch.events.len(),
            invalidated,
            refreshed = refreshed_dirs.len(),
            "applied change batch"
        );

        TreeUpdate {
            sequence: batch.sequence,
            events: batch.events,
            invalidated,
            refreshed_dirs,
        }
    }

    /// Re-list every open view a directory-level change marked stale. A view
    /// that can no longer be listed is dropped. Returns the reloaded dirs.
    pub async fn reload_stale(&mut self) -> Vec<PathBuf> {
        let mut reloaded = Vec::new();
        for dir in std::mem::take(&mut self.stale) {
            if !self.materialized.contains_key(&dir) {
                continue;
            }
            let listing = if self.loader.root() == Some(dir.as_path()) {
                self.loader.load_root(&dir, self.show_hidden).await
            } else {
                self.loader.load_folder(&dir, self.show_hidden).await
            };
            match listing {
                Ok(nodes) => {
                    self.materialized.insert(dir.clone(), nodes);
                    reloaded.push(dir);
                }
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "dropping view that failed to reload");
                    self.materialized.remove(&dir);
                }
            }
        }
        reloaded
    }

    pub async fn read_file(&self, path: &Path) -> Result<SmartRead> {
        self.loader.backend().read_file_smart(path).await
    }

    /// Write through the backend, then evict whatever the write made stale.
    pub async fn write_file(&mut self, path: &Path, content: &str) -> Result<usize> {
        let path = normalize_path(path);
        self.loader.backend().write_file(&path, content).await?;
        Ok(self.invalidate(Some(&path)))
    }

    fn in_scope(&self, event: &ChangeEvent) -> bool {
        match self.watched_root().or_else(|| self.loader.root()) {
            Some(root) => {
                is_within(&event.path, root)
                    || event.old_path.as_deref().is_some_and(|old| is_within(old, root))
            }
            None => true,
        }
    }

    /// Events as the open views should see them. Without `show_hidden`,
    /// dot-files never enter a view; renaming a visible entry to a hidden
    /// name reads as its removal.
    fn visible_events(&self, events: &[ChangeEvent]) -> Vec<ChangeEvent> {
        if self.show_hidden {
            return events.to_vec();
        }
        let hidden = |path: &Path| file_name_of(path).starts_with('.');
        events
            .iter()
            .filter_map(|event| {
                if !hidden(&event.path) {
                    return Some(event.clone());
                }
                match &event.old_path {
                    Some(old) if event.event_type == ChangeKind::Created && !hidden(old) => {
                        let mut removal =
                            ChangeEvent::new(ChangeKind::Deleted, old.clone(), event.timestamp);
                        removal.is_directory = event.is_directory;
                        Some(removal)
                    }
                    _ => None,
                }
            })
            .collect()
    }

    fn apply_to_materialized(&mut self, events: &[ChangeEvent]) -> Vec<PathBuf> {
        // Views of removed or renamed-away directories are gone wholesale.
        for event in events {
            let vanished = match (event.event_type, &event.old_path) {
                (ChangeKind::Deleted, _) => Some(&event.path),
                (ChangeKind::Created, Some(old)) => Some(old),
                _ => None,
            };
            if let Some(gone) = vanished {
                self.materialized.retain(|dir, _| !is_within(dir, gone));
            }
        }

        let mut refreshed = Vec::new();

        // A directory reported as modified as a whole (a flood collapse, a
        // checkout) may differ anywhere below; its open views are re-listed.
        for event in events {
            if event.event_type == ChangeKind::Modified && event.is_directory {
                for dir in self.materialized.keys() {
                    if is_within(dir, &event.path) && self.stale.insert(dir.clone()) {
                        refreshed.push(dir.clone());
                    }
                }
            }
        }

        let Some(root) = self.watched_root().or_else(|| self.loader.root()).map(Path::to_path_buf) else {
            return refreshed;
        };
        let visible = self.visible_events(events);
        let diffs: Vec<(PathBuf, FileSystemDiff)> = {
            let materialized = &self.materialized;
            diff::diffs_for_events(&visible, &root, |path| {
                let parent = path.parent()?;
                materialized
                    .get(parent)?
                    .iter()
                    .find(|n| n.path == path)
                    .cloned()
            })
            .into_iter()
            .collect()
        };

        for (dir, change) in diffs {
            let Some(current) = self.materialized.get(&dir) else {
                continue;
            };
            let next = diff::apply(current, &change);
            if &next != current {
                self.materialized.insert(dir.clone(), next);
                if !refreshed.contains(&dir) {
                    refreshed.push(dir);
                }
            }
        }
        refreshed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::snapshot::MemoryStore;
    use std::time::Duration;

    fn engine(fake: &FakeBackend) -> TreeEngine<FakeBackend> {
        TreeEngine::new(
            Arc::new(fake.clone()),
            Box::new(MemoryStore::new()),
            &EngineConfig::default(),
        )
    }

    fn names(nodes: &[FileNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    fn proj() -> FakeBackend {
        FakeBackend::new()
            .with_dir("/proj", &["b.ts", "a.ts", "Sub/", "README.md"])
            .with_dir("/proj/Sub", &["inner.rs"])
    }

    #[tokio::test]
    async fn root_listing_is_cached_and_materialized() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.load_root(Path::new("/proj")).await.unwrap();
        let again = engine.load_root(Path::new("/proj")).await.unwrap();

        assert_eq!(fake.list_calls("/proj"), 1);
        assert_eq!(names(&again), vec!["Sub", "README.md", "a.ts", "b.ts"]);
        assert!(engine.materialized(Path::new("/proj")).is_some());
    }

    #[tokio::test]
    async fn new_root_stops_previous_watch() {
        let fake = FakeBackend::new();
        let mut engine = engine(&fake);
        engine.start_watching(Path::new("/a")).await.unwrap();
        engine.start_watching(Path::new("/b")).await.unwrap();

        assert_eq!(fake.stopped(), vec![PathBuf::from("/a")]);
        assert_eq!(fake.active_watches(), vec![PathBuf::from("/b")]);
        assert_eq!(engine.watched_root(), Some(Path::new("/b")));
    }

    #[tokio::test]
    async fn watching_same_root_twice_keeps_subscription() {
        let fake = FakeBackend::new();
        let mut engine = engine(&fake);
        let first = engine.start_watching(Path::new("/a")).await.unwrap();
        let second = engine.start_watching(Path::new("/a")).await.unwrap();
        assert_eq!(first, second);
        assert!(fake.stopped().is_empty());
    }

    #[tokio::test]
    async fn watcher_failure_leaves_engine_usable() {
        let fake = proj();
        fake.fail_watch(true);
        let mut engine = engine(&fake);

        let err = engine.start_watching(Path::new("/proj")).await.unwrap_err();
        assert_eq!(err.code(), "WATCHER_START_FAILED");
        assert!(err.is_recoverable());
        assert!(!engine.is_watching());
        assert_eq!(engine.load_root(Path::new("/proj")).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn stop_failure_is_reported() {
        let fake = FakeBackend::new();
        let mut engine = engine(&fake);
        engine.start_watching(Path::new("/a")).await.unwrap();
        fake.fail_unwatch(true);
        let err = engine.stop_watching().await.unwrap_err();
        assert_eq!(err.code(), "WATCHER_STOP_FAILED");
        assert!(!engine.is_watching());
    }

    #[tokio::test]
    async fn switching_root_discards_pending_events() {
        let fake = FakeBackend::new();
        let mut engine = engine(&fake);
        engine.start_watching(Path::new("/a")).await.unwrap();
        assert!(engine.handle_event(ChangeEvent::new(ChangeKind::Created, "/a/x", 1)));
        assert_eq!(engine.pending_events(), 1);

        engine.start_watching(Path::new("/b")).await.unwrap();
        assert_eq!(engine.pending_events(), 0);
        assert!(engine.flush().is_none());
    }

    #[tokio::test]
    async fn events_outside_root_are_dropped() {
        let fake = FakeBackend::new();
        let mut engine = engine(&fake);
        engine.start_watching(Path::new("/proj")).await.unwrap();
        assert!(!engine.handle_event(ChangeEvent::new(ChangeKind::Created, "/elsewhere/x", 1)));
        assert!(!engine.handle_event(ChangeEvent::new(ChangeKind::Created, "/project2/x", 1)));

        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ChangeEvent::new(ChangeKind::Created, "/elsewhere/y", 1)).unwrap();
        drop(tx);
        assert!(engine.next_update(&mut rx).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_modifications_collapse_to_latest() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.start_watching(Path::new("/proj")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ChangeEvent::new(ChangeKind::Modified, "/proj/README.md", 100)).unwrap();
        tx.send(ChangeEvent::new(ChangeKind::Modified, "/proj/README.md", 300)).unwrap();

        let update = engine.next_update(&mut rx).await.unwrap();
        assert_eq!(update.sequence, 1);
        assert_eq!(update.events.len(), 1);
        assert_eq!(update.events[0].timestamp, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn structural_batch_flushes_before_modify_window() {
        let fake = FakeBackend::new();
        let mut engine = engine(&fake);
        engine.start_watching(Path::new("/proj")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ChangeEvent::new(ChangeKind::Created, "/proj/new.ts", 1)).unwrap();

        let started = Instant::now();
        engine.next_update(&mut rx).await.unwrap();
        let waited = Instant::now() - started;
        assert!(waited >= Duration::from_millis(50));
        assert!(waited < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_patches_materialized_listing_and_cache() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.load_root(Path::new("/proj")).await.unwrap();
        engine.start_watching(Path::new("/proj")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ChangeEvent::new(ChangeKind::Created, "/proj/c.ts", 5)).unwrap();
        tx.send(ChangeEvent::new(ChangeKind::Deleted, "/proj/b.ts", 5)).unwrap();

        let update = engine.next_update(&mut rx).await.unwrap();
        assert_eq!(update.refreshed_dirs, vec![PathBuf::from("/proj")]);
        assert!(update.invalidated >= 1);

        let view = engine.materialized(Path::new("/proj")).unwrap();
        assert_eq!(names(view), vec!["Sub", "README.md", "a.ts", "c.ts"]);

        // The cached root listing was evicted, so the next load asks the backend.
        engine.load_root(Path::new("/proj")).await.unwrap();
        assert_eq!(fake.list_calls("/proj"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sequences_increase_across_batches() {
        let fake = FakeBackend::new();
        let mut engine = engine(&fake);
        engine.start_watching(Path::new("/proj")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ChangeEvent::new(ChangeKind::Created, "/proj/a", 1)).unwrap();
        let first = engine.next_update(&mut rx).await.unwrap();
        tx.send(ChangeEvent::new(ChangeKind::Created, "/proj/b", 2)).unwrap();
        let second = engine.next_update(&mut rx).await.unwrap();
        assert!(second.sequence > first.sequence);
    }

    #[tokio::test]
    async fn rename_across_directories_moves_node() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.load_root(Path::new("/proj")).await.unwrap();
        engine.load_folder(Path::new("/proj/Sub")).await.unwrap();
        engine.start_watching(Path::new("/proj")).await.unwrap();

        engine.handle_event(
            ChangeEvent::new(ChangeKind::Created, "/proj/Sub/a.ts", 9).renamed_from("/proj/a.ts"),
        );
        let update = engine.flush().unwrap();

        assert_eq!(
            update.refreshed_dirs,
            vec![PathBuf::from("/proj"), PathBuf::from("/proj/Sub")]
        );
        assert_eq!(
            names(engine.materialized(Path::new("/proj")).unwrap()),
            vec!["Sub", "README.md", "b.ts"]
        );
        let sub = engine.materialized(Path::new("/proj/Sub")).unwrap();
        assert_eq!(names(sub), vec!["a.ts", "inner.rs"]);
        // Metadata survives the move.
        assert_eq!(sub[0].size, Some(10));
        assert_eq!(sub[0].depth, 1);
    }

    #[tokio::test]
    async fn deleting_a_directory_drops_its_views() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.load_root(Path::new("/proj")).await.unwrap();
        engine.load_folder(Path::new("/proj/Sub")).await.unwrap();
        engine.start_watching(Path::new("/proj")).await.unwrap();

        engine.handle_event(ChangeEvent::new(ChangeKind::Deleted, "/proj/Sub", 9).directory());
        engine.flush().unwrap();

        assert!(engine.materialized(Path::new("/proj/Sub")).is_none());
        assert_eq!(
            names(engine.materialized(Path::new("/proj")).unwrap()),
            vec!["README.md", "a.ts", "b.ts"]
        );
    }

    #[tokio::test]
    async fn collapse_forgets_descendant_views() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.load_root(Path::new("/proj")).await.unwrap();
        engine.load_folder(Path::new("/proj/Sub")).await.unwrap();
        engine.collapse(Path::new("/proj/Sub"));
        assert!(engine.materialized(Path::new("/proj/Sub")).is_none());
        assert!(engine.materialized(Path::new("/proj")).is_some());
        // The listing stays cached.
        engine.load_folder(Path::new("/proj/Sub")).await.unwrap();
        assert_eq!(fake.list_calls("/proj/Sub"), 1);
    }

    #[tokio::test]
    async fn snapshot_is_reused_while_valid() {
        let fake = proj();
        fake.set_mtime("/proj", 0);
        let mut engine = engine(&fake);

        let first = engine.snapshot_root(Path::new("/proj"), false).await.unwrap();
        let second = engine.snapshot_root(Path::new("/proj"), false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.nodes.len(), 5);
        assert!(first.checksum_matches());
        assert_eq!(fake.list_calls("/proj"), 1);

        engine.snapshot_root(Path::new("/proj"), true).await.unwrap();
        assert_eq!(fake.list_calls("/proj"), 2);
    }

    #[tokio::test]
    async fn failed_probe_forces_rescan() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.snapshot_root(Path::new("/proj"), false).await.unwrap();
        engine.snapshot_root(Path::new("/proj"), false).await.unwrap();
        assert_eq!(fake.list_calls("/proj"), 2);
    }

    #[tokio::test]
    async fn write_through_invalidates_listing() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.load_folder(Path::new("/proj/Sub")).await.unwrap();

        let evicted = engine
            .write_file(Path::new("/proj/Sub/inner.rs"), "fn main() {}")
            .await
            .unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(fake.file("/proj/Sub/inner.rs").as_deref(), Some("fn main() {}"));

        engine.load_folder(Path::new("/proj/Sub")).await.unwrap();
        assert_eq!(fake.list_calls("/proj/Sub"), 2);

        let read = engine.read_file(Path::new("/proj/Sub/inner.rs")).await.unwrap();
        assert_eq!(read.content.as_deref(), Some("fn main() {}"));
    }

    #[tokio::test]
    async fn full_invalidation_clears_listings_and_snapshots() {
        let fake = proj();
        fake.set_mtime("/proj", 0);
        let mut engine = engine(&fake);
        engine.load_root(Path::new("/proj")).await.unwrap();
        engine.snapshot_root(Path::new("/proj"), false).await.unwrap();

        assert_eq!(engine.invalidate(None), 2);
        assert_eq!(engine.cached_listings(), 0);
        assert!(engine.snapshots().is_empty());
    }

    #[tokio::test]
    async fn hidden_files_stay_out_of_views() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.load_root(Path::new("/proj")).await.unwrap();
        engine.start_watching(Path::new("/proj")).await.unwrap();

        engine.handle_event(ChangeEvent::new(ChangeKind::Created, "/proj/.a.ts.swp", 3));
        engine.handle_event(ChangeEvent::new(ChangeKind::Modified, "/proj/.a.ts.swx", 3));
        let update = engine.flush().unwrap();

        assert!(update.refreshed_dirs.is_empty());
        assert_eq!(
            names(engine.materialized(Path::new("/proj")).unwrap()),
            vec!["Sub", "README.md", "a.ts", "b.ts"]
        );
    }

    #[tokio::test]
    async fn rename_to_hidden_name_removes_entry() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.load_root(Path::new("/proj")).await.unwrap();
        engine.start_watching(Path::new("/proj")).await.unwrap();

        engine.handle_event(
            ChangeEvent::new(ChangeKind::Created, "/proj/.a.ts", 3).renamed_from("/proj/a.ts"),
        );
        engine.flush().unwrap();

        assert_eq!(
            names(engine.materialized(Path::new("/proj")).unwrap()),
            vec!["Sub", "README.md", "b.ts"]
        );
    }

    #[tokio::test]
    async fn hidden_files_join_views_when_shown() {
        let fake = proj();
        let config = EngineConfig {
            cache: crate::config::CacheConfig {
                show_hidden: Some(true),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut engine = TreeEngine::new(Arc::new(fake.clone()), Box::new(MemoryStore::new()), &config);
        engine.load_root(Path::new("/proj")).await.unwrap();
        engine.start_watching(Path::new("/proj")).await.unwrap();

        engine.handle_event(ChangeEvent::new(ChangeKind::Created, "/proj/.env", 3));
        engine.flush().unwrap();

        assert!(names(engine.materialized(Path::new("/proj")).unwrap()).contains(&".env"));
    }

    #[tokio::test(start_paused = true)]
    async fn directory_level_change_reloads_open_views() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.load_root(Path::new("/proj")).await.unwrap();
        engine.load_folder(Path::new("/proj/Sub")).await.unwrap();
        engine.start_watching(Path::new("/proj")).await.unwrap();

        // The tree changes behind the engine's back, e.g. a branch checkout.
        let _ = fake
            .clone()
            .with_dir("/proj", &["main.rs", "Sub/"])
            .with_dir("/proj/Sub", &["inner.rs", "extra.rs"]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ChangeEvent::new(ChangeKind::Modified, "/proj", 7).directory()).unwrap();
        let update = engine.next_update(&mut rx).await.unwrap();

        let mut refreshed = update.refreshed_dirs.clone();
        refreshed.sort();
        assert_eq!(refreshed, vec![PathBuf::from("/proj"), PathBuf::from("/proj/Sub")]);
        assert_eq!(
            names(engine.materialized(Path::new("/proj")).unwrap()),
            vec!["Sub", "main.rs"]
        );
        assert_eq!(
            names(engine.materialized(Path::new("/proj/Sub")).unwrap()),
            vec!["extra.rs", "inner.rs"]
        );
        assert_eq!(fake.list_calls("/proj"), 2);
        assert!(engine.stale_views().is_empty());
    }

    #[tokio::test]
    async fn stale_view_that_fails_to_reload_is_dropped() {
        let fake = proj();
        let mut engine = engine(&fake);
        engine.load_root(Path::new("/proj")).await.unwrap();
        engine.load_folder(Path::new("/proj/Sub")).await.unwrap();
        engine.start_watching(Path::new("/proj")).await.unwrap();

        engine.handle_event(ChangeEvent::new(ChangeKind::Modified, "/proj/Sub", 7).directory());
        let update = engine.flush().unwrap();
        assert!(update.refreshed_dirs.contains(&PathBuf::from("/proj/Sub")));
        assert_eq!(engine.stale_views(), vec![PathBuf::from("/proj/Sub")]);

        fake.fail("/proj/Sub");
        assert!(engine.reload_stale().await.is_empty());
        assert!(engine.materialized(Path::new("/proj/Sub")).is_none());
        assert!(engine.materialized(Path::new("/proj")).is_some());
    }
}
