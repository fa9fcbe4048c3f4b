//! Scriptable in-memory backend for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Backend, MtimeProbe, SmartRead, WatcherId};
use crate::error::{EngineError, Result};
use crate::fs::node::{extension_of, file_name_of, RawEntry};

#[derive(Default)]
struct State {
    listings: HashMap<PathBuf, Vec<RawEntry>>,
    failing: HashSet<PathBuf>,
    mtimes: HashMap<PathBuf, u64>,
    files: HashMap<PathBuf, String>,
    list_calls: HashMap<PathBuf, usize>,
    watchers: HashMap<WatcherId, PathBuf>,
    next_watcher: u64,
    fail_watch: bool,
    fail_unwatch: bool,
    stopped: Vec<PathBuf>,
}

/// Cloneable handle; all clones share state.
#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    state: Arc<Mutex<State>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake backend state poisoned")
    }

    /// Register `dir` with children given as `"name"` (file) or `"name/"` (directory).
    pub fn with_dir(self, dir: &str, children: &[&str]) -> Self {
        let dir = PathBuf::from(dir);
        let entries = children
            .iter()
            .map(|child| {
                let is_directory = child.ends_with('/');
                let path = dir.join(child.trim_end_matches('/'));
                RawEntry {
                    name: file_name_of(&path),
                    extension: if is_directory { None } else { extension_of(&path) },
                    size: if is_directory { None } else { Some(10) },
                    last_modified: 1_000,
                    depth: 0,
                    is_directory,
                    path,
                }
            })
            .collect();
        self.state().listings.insert(dir, entries);
        self
    }

    pub fn fail(&self, dir: &str) {
        self.state().failing.insert(PathBuf::from(dir));
    }

    pub fn set_mtime(&self, dir: &str, mtime: u64) {
        self.state().mtimes.insert(PathBuf::from(dir), mtime);
    }

    pub fn fail_watch(&self, fail: bool) {
        self.state().fail_watch = fail;
    }

    pub fn fail_unwatch(&self, fail: bool) {
        self.state().fail_unwatch = fail;
    }

    pub fn list_calls(&self, dir: &str) -> usize {
        self.state()
            .list_calls
            .get(Path::new(dir))
            .copied()
            .unwrap_or(0)
    }

    pub fn active_watches(&self) -> Vec<PathBuf> {
        self.state().watchers.values().cloned().collect()
    }

    pub fn stopped(&self) -> Vec<PathBuf> {
        self.state().stopped.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state().files.get(Path::new(path)).cloned()
    }

    fn list(&self, dir: &Path) -> Result<Vec<RawEntry>> {
        let mut state = self.state();
        *state.list_calls.entry(dir.to_path_buf()).or_insert(0) += 1;
        if state.failing.contains(dir) {
            return Err(EngineError::unavailable(dir, "permission denied"));
        }
        state
            .listings
            .get(dir)
            .cloned()
            .ok_or_else(|| EngineError::unavailable(dir, "no such directory"))
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn load_root_items(&self, root: &Path, _include_hidden: bool) -> Result<Vec<RawEntry>> {
        self.list(root)
    }

    async fn load_folder_contents(
        &self,
        folder: &Path,
        _include_hidden: bool,
    ) -> Result<Vec<RawEntry>> {
        self.list(folder)
    }

    async fn get_directory_mtime(&self, path: &Path) -> Result<MtimeProbe> {
        match self.state().mtimes.get(path) {
            Some(&mtime) => Ok(MtimeProbe {
                mtime,
                success: true,
            }),
            None => Err(EngineError::Probe {
                path: path.to_path_buf(),
                reason: "unknown path".into(),
            }),
        }
    }

    async fn start_file_watcher(&self, path: &Path) -> Result<WatcherId> {
        let mut state = self.state();
        if state.fail_watch {
            return Err(EngineError::WatcherStartFailed {
                path: path.to_path_buf(),
                reason: "watch limit reached".into(),
            });
        }
        state.next_watcher += 1;
        let id = WatcherId(state.next_watcher);
        state.watchers.insert(id, path.to_path_buf());
        Ok(id)
    }

    async fn stop_file_watcher(&self, id: WatcherId) -> Result<()> {
        let mut state = self.state();
        let path = state.watchers.remove(&id).unwrap_or_default();
        if state.fail_unwatch {
            return Err(EngineError::WatcherStopFailed {
                path,
                reason: "backend gone".into(),
            });
        }
        state.stopped.push(path);
        Ok(())
    }

    async fn read_file_smart(&self, path: &Path) -> Result<SmartRead> {
        let content = self.state().files.get(path).cloned();
        Ok(SmartRead {
            size: content.as_ref().map(|c| c.len() as u64).unwrap_or(0),
            content,
            is_binary: false,
            is_too_large: false,
            should_use_hex_mode: false,
            warning: None,
        })
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        self.state()
            .files
            .insert(path.to_path_buf(), content.to_string());
        Ok(())
    }
}
