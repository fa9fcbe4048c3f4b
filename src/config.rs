//! Engine configuration: TOML file loading, CLI overrides, and defaults.
//!
//! Resolution order (first found wins, values merge/override):
//! 1. CLI flags (`--config`, `--show-hidden`, `--log-level`, etc.)
//! 2. `$TREESYNC_CONFIG` environment variable (path to config file)
//! 3. Project-local `.treesync.toml` in the current working directory
//! 4. Global `~/.config/treesync/config.toml`
//! 5. Built-in defaults

use std::path::{Path, PathBuf};

use serde::Deserialize;

// ── Section configs ──────────────────────────────────────────────────────────

/// Directory listing cache settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of memoized listings before LRU eviction.
    pub capacity: Option<usize>,
    /// Include hidden entries in listings by default.
    pub show_hidden: Option<bool>,
}

/// Change event normalizer settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Window in which identical notifications are duplicates.
    pub dedup_window_ms: Option<u64>,
    /// Age after which dedup entries are purged.
    pub dedup_retention_ms: Option<u64>,
    /// Flush delay after a create/delete.
    pub structural_flush_ms: Option<u64>,
    /// Flush delay after a modify.
    pub modify_flush_ms: Option<u64>,
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Number of root snapshots retained.
    pub capacity: Option<usize>,
    /// Maximum snapshot age considered fresh.
    pub freshness_secs: Option<u64>,
    /// Allowed skew between directory mtime and capture time.
    pub mtime_tolerance_ms: Option<u64>,
    /// Depth below a root within which changes refresh the root listing.
    pub root_invalidation_depth: Option<usize>,
    /// Directory holding persisted snapshots.
    pub storage_dir: Option<String>,
}

/// Filesystem watcher settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WatcherConfig {
    /// Enable live updates.
    pub enabled: Option<bool>,
    /// Path components that are never reported.
    pub ignore_patterns: Option<Vec<String>>,
    /// Notifications per second above which a root refresh is sent instead.
    pub flood_threshold: Option<usize>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: Option<String>,
}

// ── Top-level config ─────────────────────────────────────────────────────────

/// Top-level engine configuration.
///
/// All fields are optional so that partial configs from different sources
/// can be merged together (CLI overrides file, file overrides defaults).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub normalizer: NormalizerConfig,
    pub snapshot: SnapshotConfig,
    pub watcher: WatcherConfig,
    pub logging: LoggingConfig,
}

// ── Default constants ────────────────────────────────────────────────────────

pub const DEFAULT_CACHE_CAPACITY: usize = 512;
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 1000;
pub const DEFAULT_DEDUP_RETENTION_MS: u64 = 5000;
pub const DEFAULT_STRUCTURAL_FLUSH_MS: u64 = 50;
pub const DEFAULT_MODIFY_FLUSH_MS: u64 = 200;
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 10;
/// Five minutes.
pub const DEFAULT_SNAPSHOT_FRESHNESS_SECS: u64 = 300;
pub const DEFAULT_MTIME_TOLERANCE_MS: u64 = 1000;
pub const DEFAULT_ROOT_INVALIDATION_DEPTH: usize = 3;
pub const DEFAULT_FLOOD_THRESHOLD: usize = 100;

/// Default patterns to ignore when watching the filesystem.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    "target",
];

// ── Config file locator ──────────────────────────────────────────────────────

/// Return the list of candidate config file paths in priority order.
///
/// Does NOT include the CLI `--config` path; that is handled separately.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(env_path) = std::env::var("TREESYNC_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".treesync.toml"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("treesync").join("config.toml"));
    }

    paths
}

/// Try to read and parse a TOML config file. Returns `None` if the file
/// doesn't exist or can't be parsed (with a warning logged).
fn load_file(path: &Path) -> Option<EngineConfig> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<EngineConfig>(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse config file");
            None
        }
    }
}

// ── Merge logic ──────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Merge `other` on top of `self`; `other`'s `Some` values win.
    pub fn merge(self, other: &EngineConfig) -> EngineConfig {
        EngineConfig {
            cache: CacheConfig {
                capacity: other.cache.capacity.or(self.cache.capacity),
                show_hidden: other.cache.show_hidden.or(self.cache.show_hidden),
            },
            normalizer: NormalizerConfig {
                dedup_window_ms: other
                    .normalizer
                    .dedup_window_ms
                    .or(self.normalizer.dedup_window_ms),
                dedup_retention_ms: other
                    .normalizer
                    .dedup_retention_ms
                    .or(self.normalizer.dedup_retention_ms),
                structural_flush_ms: other
                    .normalizer
                    .structural_flush_ms
                    .or(self.normalizer.structural_flush_ms),
                modify_flush_ms: other
                    .normalizer
                    .modify_flush_ms
                    .or(self.normalizer.modify_flush_ms),
            },
            snapshot: SnapshotConfig {
                capacity: other.snapshot.capacity.or(self.snapshot.capacity),
                freshness_secs: other
                    .snapshot
                    .freshness_secs
                    .or(self.snapshot.freshness_secs),
                mtime_tolerance_ms: other
                    .snapshot
                    .mtime_tolerance_ms
                    .or(self.snapshot.mtime_tolerance_ms),
                root_invalidation_depth: other
                    .snapshot
                    .root_invalidation_depth
                    .or(self.snapshot.root_invalidation_depth),
                storage_dir: other
                    .snapshot
                    .storage_dir
                    .clone()
                    .or(self.snapshot.storage_dir),
            },
            watcher: WatcherConfig {
                enabled: other.watcher.enabled.or(self.watcher.enabled),
                ignore_patterns: other
                    .watcher
                    .ignore_patterns
                    .clone()
                    .or(self.watcher.ignore_patterns),
                flood_threshold: other
                    .watcher
                    .flood_threshold
                    .or(self.watcher.flood_threshold),
            },
            logging: LoggingConfig {
                level: other.logging.level.clone().or(self.logging.level),
            },
        }
    }

    /// Load the final merged configuration.
    ///
    /// `cli_config_path` is an explicit config file path from `--config`.
    /// `cli_overrides` are partial overrides derived from CLI flags.
    pub fn load(cli_config_path: Option<&Path>, cli_overrides: Option<&EngineConfig>) -> Self {
        let mut config = EngineConfig::default();

        // Lowest priority first so higher overwrites.
        for path in candidate_paths().iter().rev() {
            if let Some(file_cfg) = load_file(path) {
                config = config.merge(&file_cfg);
            }
        }

        if let Some(cli_path) = cli_config_path {
            if let Some(file_cfg) = load_file(cli_path) {
                config = config.merge(&file_cfg);
            }
        }

        if let Some(overrides) = cli_overrides {
            config = config.merge(overrides);
        }

        config
    }

    // ── Convenience getters with built-in defaults ──────────────────────────

    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY).max(1)
    }

    pub fn show_hidden(&self) -> bool {
        self.cache.show_hidden.unwrap_or(false)
    }

    pub fn dedup_window_ms(&self) -> u64 {
        self.normalizer
            .dedup_window_ms
            .unwrap_or(DEFAULT_DEDUP_WINDOW_MS)
    }

    pub fn dedup_retention_ms(&self) -> u64 {
        self.normalizer
            .dedup_retention_ms
            .unwrap_or(DEFAULT_DEDUP_RETENTION_MS)
    }

    pub fn structural_flush_ms(&self) -> u64 {
        self.normalizer
            .structural_flush_ms
            .unwrap_or(DEFAULT_STRUCTURAL_FLUSH_MS)
    }

    pub fn modify_flush_ms(&self) -> u64 {
        self.normalizer
            .modify_flush_ms
            .unwrap_or(DEFAULT_MODIFY_FLUSH_MS)
    }

    pub fn snapshot_capacity(&self) -> usize {
        self.snapshot
            .capacity
            .unwrap_or(DEFAULT_SNAPSHOT_CAPACITY)
            .max(1)
    }

    pub fn snapshot_freshness_secs(&self) -> u64 {
        self.snapshot
            .freshness_secs
            .unwrap_or(DEFAULT_SNAPSHOT_FRESHNESS_SECS)
    }

    pub fn mtime_tolerance_ms(&self) -> u64 {
        self.snapshot
            .mtime_tolerance_ms
            .unwrap_or(DEFAULT_MTIME_TOLERANCE_MS)
    }

    pub fn root_invalidation_depth(&self) -> usize {
        self.snapshot
            .root_invalidation_depth
            .unwrap_or(DEFAULT_ROOT_INVALIDATION_DEPTH)
    }

    /// Where snapshots are persisted; `None` when no cache dir is known.
    pub fn storage_dir(&self) -> Option<PathBuf> {
        match &self.snapshot.storage_dir {
            Some(dir) => Some(PathBuf::from(dir)),
            None => dirs::cache_dir().map(|d| d.join("treesync")),
        }
    }

    pub fn watcher_enabled(&self) -> bool {
        self.watcher.enabled.unwrap_or(true)
    }

    pub fn ignore_patterns(&self) -> Vec<String> {
        match &self.watcher.ignore_patterns {
            Some(patterns) => patterns.clone(),
            None => DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn flood_threshold(&self) -> usize {
        self.watcher
            .flood_threshold
            .unwrap_or(DEFAULT_FLOOD_THRESHOLD)
    }

    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or("info")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
