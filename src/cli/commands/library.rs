//! Root directory, catalog listing and settings commands.

use clap::Args;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

use super::{Cli, open_library};
use crate::config::ScanSettings;
use crate::events::EventBus;

/// Settings to change; with none given, the current settings are printed.
#[derive(Args, Debug, Default)]
pub struct SettingsChange {
    /// Descend into subdirectories
    #[arg(long)]
    pub recursive: Option<bool>,
    /// Keep a filesystem watch on every root
    #[arg(long)]
    pub watch: Option<bool>,
    /// Scan when the library starts
    #[arg(long)]
    pub scan_on_startup: Option<bool>,
    /// Index new files as soon as they appear
    #[arg(long)]
    pub auto_index: Option<bool>,
    /// Files extracted concurrently during a scan
    #[arg(long)]
    pub workers: Option<usize>,
    /// Accepted extensions, comma separated (replaces the list)
    #[arg(long, value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,
    /// Add an exclude pattern (case-insensitive substring of the file name)
    #[arg(long)]
    pub exclude: Vec<String>,
    /// Remove every exclude pattern before adding new ones
    #[arg(long)]
    pub clear_excludes: bool,
}

impl SettingsChange {
    pub fn is_empty(&self) -> bool {
        self.recursive.is_none()
            && self.watch.is_none()
            && self.scan_on_startup.is_none()
            && self.auto_index.is_none()
            && self.workers.is_none()
            && self.extensions.is_none()
            && self.exclude.is_empty()
            && !self.clear_excludes
    }

    pub fn apply(&self, settings: &mut ScanSettings) {
        if let Some(recursive) = self.recursive {
            settings.recursive = recursive;
        }
        if let Some(watch) = self.watch {
            settings.watch_for_changes = watch;
        }
        if let Some(scan) = self.scan_on_startup {
            settings.scan_on_startup = scan;
        }
        if let Some(auto_index) = self.auto_index {
            settings.auto_index_new_files = auto_index;
        }
        if let Some(workers) = self.workers {
            settings.scan_workers = workers;
        }
        if let Some(extensions) = &self.extensions {
            settings.extensions = extensions.clone();
        }
        if self.clear_excludes {
            settings.exclude_patterns.clear();
        }
        for pattern in &self.exclude {
            if !settings.exclude_patterns.contains(pattern) {
                settings.exclude_patterns.push(pattern.clone());
            }
        }
    }
}

/// Add a root directory and index it
pub fn cmd_add(rt: &Runtime, cli: &Cli, path: &Path) -> anyhow::Result<()> {
    rt.block_on(add(cli, path))
}

async fn add(cli: &Cli, path: &Path) -> anyhow::Result<()> {
    let library = open_library(cli, EventBus::new()).await?;
    if library.settings().get().contains_root(&std::path::absolute(path)?) {
        println!("{} is already in the library.", path.display());
        return Ok(());
    }
    match library.add_directory(path).await? {
        Some(summary) => println!(
            "Added {} ({} tracks indexed, {} failed).",
            path.display(),
            summary.parsed + summary.cached,
            summary.failed
        ),
        None => println!("Added {}. It will be indexed by the next scan.", path.display()),
    }
    Ok(())
}

/// Remove a root directory and its records
pub fn cmd_remove(rt: &Runtime, cli: &Cli, path: &Path) -> anyhow::Result<()> {
    rt.block_on(remove(cli, path))
}

async fn remove(cli: &Cli, path: &Path) -> anyhow::Result<()> {
    let library = open_library(cli, EventBus::new()).await?;
    let removed = library.remove_directory(path).await?;
    println!("Removed {} ({} tracks).", path.display(), removed);
    Ok(())
}

/// List all tracks in the catalog
pub fn cmd_list(rt: &Runtime, cli: &Cli) -> anyhow::Result<()> {
    rt.block_on(list(cli))
}

async fn list(cli: &Cli) -> anyhow::Result<()> {
    let library = open_library(cli, EventBus::new()).await?;
    let tracks = library.catalog().all_tracks().await?;
    for track in &tracks {
        println!(
            "{} - {} - {} [{}]",
            track.artist,
            track.album,
            track.name,
            track.path.display()
        );
    }
    println!("{} tracks.", tracks.len());
    Ok(())
}

/// Show or change scan settings
pub fn cmd_settings(rt: &Runtime, cli: &Cli, change: &SettingsChange) -> anyhow::Result<()> {
    rt.block_on(show_or_update_settings(cli, change))
}

async fn show_or_update_settings(cli: &Cli, change: &SettingsChange) -> anyhow::Result<()> {
    let library = open_library(cli, EventBus::new()).await?;
    let settings = if change.is_empty() {
        library.settings().get()
    } else {
        library.settings().update(|s| change.apply(s)).await?
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    print_roots(&settings.roots);
    Ok(())
}

fn print_roots(roots: &[PathBuf]) {
    for root in roots {
        let status = if root.is_dir() { "" } else { " (missing)" };
        eprintln!("root: {}{}", root.display(), status);
    }
}
