use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use treesync::config::{CacheConfig, EngineConfig, LoggingConfig, WatcherConfig};
use treesync::snapshot::{FileStore, KeyValueStore, MemoryStore};
use treesync::{logging, EngineError, FileNode, LocalBackend, LocalBackendSettings, TreeEngine, TreeUpdate};

/// Mirror a directory tree and stream live changes to it.
#[derive(Parser, Debug)]
#[command(name = "treesync", version, about)]
struct Cli {
    /// Root path to mirror (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Path to a config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Include dot-files in listings
    #[arg(long)]
    show_hidden: bool,

    /// Disable the filesystem watcher (no live updates)
    #[arg(long)]
    no_watcher: bool,

    /// Ignore any stored snapshot and scan from scratch
    #[arg(long)]
    rescan: bool,

    /// Log filter when RUST_LOG is unset (e.g. "debug")
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> EngineConfig {
        EngineConfig {
            cache: CacheConfig {
                show_hidden: self.show_hidden.then_some(true),
                ..Default::default()
            },
            watcher: WatcherConfig {
                enabled: self.no_watcher.then_some(false),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: self.log_level.clone(),
            },
            ..Default::default()
        }
    }
}

fn open_store(config: &EngineConfig) -> Box<dyn KeyValueStore> {
    match config.storage_dir().map(FileStore::open) {
        Some(Ok(store)) => Box::new(store),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "snapshot storage unavailable, keeping snapshots in memory");
            Box::new(MemoryStore::new())
        }
        None => Box::new(MemoryStore::new()),
    }
}

fn print_listing(nodes: &[FileNode]) {
    for node in nodes {
        let marker = if node.is_directory { "/" } else { "" };
        match node.size {
            Some(size) => println!("  {}{}  ({} bytes)", node.name, marker, size),
            None => println!("  {}{}", node.name, marker),
        }
    }
}

fn print_update(update: &TreeUpdate) {
    println!(
        "#{}: {} change(s), {} evicted",
        update.sequence,
        update.events.len(),
        update.invalidated
    );
    for event in &update.events {
        match &event.old_path {
            Some(old) => println!("  {} {} (from {})", event.event_type, event.path.display(), old.display()),
            None => println!("  {} {}", event.event_type, event.path.display()),
        }
    }
}

#[tokio::main]
async fn main() -> treesync::Result<()> {
    let cli = Cli::parse();

    let path = cli
        .path
        .canonicalize()
        .map_err(|_| EngineError::InvalidPath(format!("{} does not exist", cli.path.display())))?;

    let config = EngineConfig::load(cli.config.as_deref(), Some(&cli.overrides()));
    logging::init(config.log_level());

    let (backend, mut events) = LocalBackend::new(LocalBackendSettings::from(&config));
    let mut engine = TreeEngine::new(Arc::new(backend), open_store(&config), &config);

    let listing = engine.load_root(&path).await?;
    println!("{}", path.display());
    print_listing(&listing);

    let snapshot = engine.snapshot_root(&path, cli.rescan).await?;
    println!(
        "snapshot: {} nodes, checksum {}",
        snapshot.nodes.len(),
        &snapshot.checksum[..16.min(snapshot.checksum.len())]
    );

    if !config.watcher_enabled() {
        return Ok(());
    }
    if let Err(e) = engine.start_watching(&path).await {
        eprintln!("live updates unavailable: {}", e);
        return Ok(());
    }

    loop {
        tokio::select! {
            update = engine.next_update(&mut events) => match update {
                Some(update) => print_update(&update),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(e) = engine.stop_watching().await {
        tracing::warn!(error = %e, "watcher did not stop cleanly");
    }
    Ok(())
}
