//! Transactional change sets over flat node collections.
//!
//! `apply` is pure: it never mutates the input slice and always returns the
//! result in display order (directories first, then by name), so the output
//! only depends on the resulting node set.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::event::{ChangeEvent, ChangeKind};
use crate::fs::node::{display_order, is_within, FileNode};

/// A rename or move of a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedEntry {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// A set of add/remove/modify/move operations applied as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemDiff {
    pub added: Vec<FileNode>,
    pub removed: Vec<PathBuf>,
    pub modified: Vec<FileNode>,
    pub moved: Vec<MovedEntry>,
}

impl FileSystemDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.modified.is_empty()
            && self.moved.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len() + self.moved.len()
    }
}

/// Apply `diff` to `current`, returning a new collection.
///
/// Operation categories run in a fixed order: removals, additions,
/// modifications, then moves. Moving a directory also re-homes any of its
/// descendants present in the collection.
pub fn apply(current: &[FileNode], diff: &FileSystemDiff) -> Vec<FileNode> {
    let mut by_path: HashMap<PathBuf, FileNode> = current
        .iter()
        .map(|node| (node.path.clone(), node.clone()))
        .collect();

    for path in &diff.removed {
        by_path.remove(path);
    }

    for node in &diff.added {
        by_path.insert(node.path.clone(), node.clone());
    }

    for node in &diff.modified {
        by_path.insert(node.path.clone(), node.clone());
    }

    for MovedEntry { from, to } in &diff.moved {
        let Some(node) = by_path.remove(from) else {
            tracing::debug!(from = %from.display(), "move source not present, skipping");
            continue;
        };
        if node.is_directory {
            let descendants: Vec<PathBuf> = by_path
                .keys()
                .filter(|p| is_within(p, from))
                .cloned()
                .collect();
            for old in descendants {
                if let Some(child) = by_path.remove(&old) {
                    let rel = old.strip_prefix(from).unwrap_or(old.as_path());
                    let moved = child.relocated(&to.join(rel));
                    by_path.insert(moved.path.clone(), moved);
                }
            }
        }
        let moved = node.relocated(to);
        by_path.insert(moved.path.clone(), moved);
    }

    let mut out: Vec<FileNode> = by_path.into_values().collect();
    out.sort_by(display_order);
    out
}

/// Split a batch of change events into one diff per parent directory.
///
/// `existing` looks up the currently known node for a path, so moves and
/// modifications keep metadata the notification does not carry. A move
/// across directories becomes a removal in the old parent and an addition
/// in the new one.
pub fn diffs_for_events<F>(
    events: &[ChangeEvent],
    root: &Path,
    existing: F,
) -> BTreeMap<PathBuf, FileSystemDiff>
where
    F: Fn(&Path) -> Option<FileNode>,
{
    let mut diffs: BTreeMap<PathBuf, FileSystemDiff> = BTreeMap::new();

    for event in events {
        let Some(parent) = event.path.parent() else {
            continue;
        };
        let parent = parent.to_path_buf();

        match (event.event_type, &event.old_path) {
            (ChangeKind::Deleted, _) => {
                diffs.entry(parent).or_default().removed.push(event.path.clone());
            }
            (ChangeKind::Created, Some(old_path)) => {
                let old_parent = old_path.parent().map(Path::to_path_buf);
                if old_parent.as_ref() == Some(&parent) {
                    diffs.entry(parent).or_default().moved.push(MovedEntry {
                        from: old_path.clone(),
                        to: event.path.clone(),
                    });
                } else {
                    let node = existing(old_path)
                        .map(|n| n.relocated(&event.path))
                        .unwrap_or_else(|| node_for(event, root));
                    if let Some(old_parent) = old_parent {
                        diffs
                            .entry(old_parent)
                            .or_default()
                            .removed
                            .push(old_path.clone());
                    }
                    diffs.entry(parent).or_default().added.push(node);
                }
            }
            (ChangeKind::Created, None) => {
                diffs.entry(parent).or_default().added.push(node_for(event, root));
            }
            (ChangeKind::Modified, _) => {
                let node = match existing(&event.path) {
                    Some(mut node) => {
                        node.last_modified = event.timestamp;
                        node
                    }
                    None => node_for(event, root),
                };
                diffs.entry(parent).or_default().modified.push(node);
            }
        }
    }

    diffs
}

fn node_for(event: &ChangeEvent, root: &Path) -> FileNode {
    FileNode::from_event(&event.path, root, event.is_directory, event.timestamp)
}
