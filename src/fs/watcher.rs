use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::event::{ChangeEvent, ChangeKind};
use crate::fs::node::now_millis;

/// Window over which notifications are counted for flood detection.
const FLOOD_WINDOW: Duration = Duration::from_millis(1000);

/// Recursive OS watcher that forwards [`ChangeEvent`]s for one root.
///
/// Dropping it stops watching.
pub struct FsWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    /// Start watching `root` recursively.
    ///
    /// Paths matching any of `ignore_patterns` are silently dropped.
    /// Once more than `flood_threshold` events arrive within one flood
    /// window, per-path events stop and the root is reported as modified
    /// instead, at most once per window.
    pub fn new(
        root: &Path,
        ignore_patterns: Vec<String>,
        flood_threshold: usize,
        event_tx: mpsc::UnboundedSender<ChangeEvent>,
    ) -> notify::Result<Self> {
        let root_path = root.to_path_buf();
        let mut gate = FloodGate::new(flood_threshold, FLOOD_WINDOW);

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    let events: Vec<ChangeEvent> = convert_event(&event)
                        .into_iter()
                        .filter(|e| !should_ignore(&e.path, &ignore_patterns))
                        .collect();

                    if events.is_empty() {
                        return;
                    }

                    let events = match gate.admit(events.len(), Instant::now()) {
                        Gate::Forward => events,
                        Gate::Refresh => {
                            tracing::debug!(root = %root_path.display(), "event flood, refreshing root");
                            vec![ChangeEvent::new(ChangeKind::Modified, root_path.clone(), now_millis())
                                .directory()]
                        }
                        Gate::Drop => return,
                    };

                    for event in events {
                        if event_tx.send(event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    // Watcher errors are non-fatal
                    tracing::warn!(error = %e, "watch error");
                }
            }
        })?;

        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching");

        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Forward,
    /// Replace the events with one root refresh.
    Refresh,
    /// Flooding and the root was refreshed recently.
    Drop,
}

/// Counts notifications per fixed window. The OS callback delivers one
/// event at a time, so floods only show up as a rate.
#[derive(Debug)]
struct FloodGate {
    threshold: usize,
    window: Duration,
    window_start: Option<Instant>,
    count: usize,
    last_refresh: Option<Instant>,
}

impl FloodGate {
    fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold,
            window,
            window_start: None,
            count: 0,
            last_refresh: None,
        }
    }

    fn admit(&mut self, events: usize, now: Instant) -> Gate {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.window => {}
            _ => {
                self.window_start = Some(now);
                self.count = 0;
            }
        }
        self.count += events;
        if self.count <= self.threshold {
            return Gate::Forward;
        }
        match self.last_refresh {
            Some(at) if now.saturating_duration_since(at) < self.window => Gate::Drop,
            _ => {
                self.last_refresh = Some(now);
                Gate::Refresh
            }
        }
    }
}

/// Translate one OS notification into change events.
fn convert_event(event: &Event) -> Vec<ChangeEvent> {
    let timestamp = now_millis();
    let first = match event.paths.first() {
        Some(p) => p.clone(),
        None => return Vec::new(),
    };

    match event.kind {
        EventKind::Create(kind) => {
            let is_directory = matches!(kind, CreateKind::Folder) || first.is_dir();
            vec![with_dir_flag(
                ChangeEvent::new(ChangeKind::Created, first, timestamp),
                is_directory,
            )]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let to = event.paths[1].clone();
            let is_directory = to.is_dir();
            vec![with_dir_flag(
                ChangeEvent::new(ChangeKind::Created, to, timestamp).renamed_from(first),
                is_directory,
            )]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            vec![ChangeEvent::new(ChangeKind::Deleted, first, timestamp)]
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            let is_directory = first.is_dir();
            let kind = if first.exists() {
                ChangeKind::Created
            } else {
                ChangeKind::Deleted
            };
            vec![with_dir_flag(ChangeEvent::new(kind, first, timestamp), is_directory)]
        }
        EventKind::Modify(_) => {
            let is_directory = first.is_dir();
            vec![with_dir_flag(
                ChangeEvent::new(ChangeKind::Modified, first, timestamp),
                is_directory,
            )]
        }
        EventKind::Remove(kind) => {
            let is_directory = matches!(kind, RemoveKind::Folder);
            vec![with_dir_flag(
                ChangeEvent::new(ChangeKind::Deleted, first, timestamp),
                is_directory,
            )]
        }
        _ => Vec::new(),
    }
}

fn with_dir_flag(event: ChangeEvent, is_directory: bool) -> ChangeEvent {
    if is_directory {
        event.directory()
    } else {
        event
    }
}

/// Check if a path should be ignored based on ignore patterns.
///
/// A path is ignored if any of its components match any ignore pattern exactly.
pub fn should_ignore(path: &Path, patterns: &[String]) -> bool {
    for component in path.components() {
        if let std::path::Component::Normal(name) = component {
            let name_str = name.to_string_lossy();
            for pattern in patterns {
                if name_str == *pattern {
                    return true;
                }
            }
        }
    }
    false
}
