use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{Backend, MtimeProbe, SmartRead, WatcherId};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::ChangeEvent;
use crate::fs::node::RawEntry;
use crate::fs::operations::{self, DEFAULT_MAX_READ_BYTES};
use crate::fs::watcher::FsWatcher;

/// Tunables for [`LocalBackend`].
#[derive(Debug, Clone)]
pub struct LocalBackendSettings {
    pub ignore_patterns: Vec<String>,
    pub flood_threshold: usize,
    pub max_read_bytes: u64,
}

impl From<&EngineConfig> for LocalBackendSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            ignore_patterns: config.ignore_patterns(),
            flood_threshold: config.flood_threshold(),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }
}

impl Default for LocalBackendSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// A backend serving the local disk, with `notify` for change events.
pub struct LocalBackend {
    settings: LocalBackendSettings,
    event_tx: mpsc::UnboundedSender<ChangeEvent>,
    watchers: Mutex<HashMap<WatcherId, FsWatcher>>,
    next_id: AtomicU64,
}

impl LocalBackend {
    /// Create the backend and the receiving end of its event channel.
    pub fn new(settings: LocalBackendSettings) -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let backend = Self {
            settings,
            event_tx,
            watchers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        };
        (backend, event_rx)
    }

    async fn list(&self, dir: &Path, include_hidden: bool) -> Result<Vec<RawEntry>> {
        let dir = dir.to_path_buf();
        let target = dir.clone();
        blocking(move || operations::list_directory(&target, include_hidden, 0))
            .await
            .map_err(|e| EngineError::unavailable(dir, e))
    }
}

/// Run blocking filesystem work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(std::io::Error::other)?
        .map_err(EngineError::from)
}

#[async_trait]
impl Backend for LocalBackend {
    async fn load_root_items(&self, root: &Path, include_hidden: bool) -> Result<Vec<RawEntry>> {
        self.list(root, include_hidden).await
    }

    async fn load_folder_contents(
        &self,
        folder: &Path,
        include_hidden: bool,
    ) -> Result<Vec<RawEntry>> {
        self.list(folder, include_hidden).await
    }

    async fn get_directory_mtime(&self, path: &Path) -> Result<MtimeProbe> {
        let target = path.to_path_buf();
        match blocking(move || operations::directory_mtime(&target)).await {
            Ok(mtime) => Ok(MtimeProbe {
                mtime,
                success: true,
            }),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "mtime probe failed");
                Ok(MtimeProbe {
                    mtime: 0,
                    success: false,
                })
            }
        }
    }

    async fn start_file_watcher(&self, path: &Path) -> Result<WatcherId> {
        let watcher = FsWatcher::new(
            path,
            self.settings.ignore_patterns.clone(),
            self.settings.flood_threshold,
            self.event_tx.clone(),
        )
        .map_err(|e| EngineError::WatcherStartFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let id = WatcherId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.watchers.lock().await.insert(id, watcher);
        Ok(id)
    }

    async fn stop_file_watcher(&self, id: WatcherId) -> Result<()> {
        match self.watchers.lock().await.remove(&id) {
            Some(watcher) => {
                tracing::info!(root = %watcher.root().display(), %id, "stopped watching");
                Ok(())
            }
            None => Err(EngineError::WatcherStopFailed {
                path: PathBuf::new(),
                reason: format!("unknown {}", id),
            }),
        }
    }

    async fn read_file_smart(&self, path: &Path) -> Result<SmartRead> {
        let target = path.to_path_buf();
        let max = self.settings.max_read_bytes;
        blocking(move || operations::read_smart(&target, max)).await
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        let target = path.to_path_buf();
        let content = content.to_string();
        blocking(move || operations::write_file(&target, &content)).await
    }
}
