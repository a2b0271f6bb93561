//! CLI command definitions and dispatch.
//!
//! Each group of subcommands is implemented in its own submodule:
//! - `scan`: scanning and file watching
//! - `library`: roots, catalog listing and settings

mod library;
mod scan;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;

use crate::config::JsonSettingsStore;
use crate::db::{self, SqliteCatalog};
use crate::events::EventBus;
use crate::fs::LocalFileSystem;
use crate::library::Library;
use crate::metadata::LoftyTagReader;

pub use library::{SettingsChange, cmd_add, cmd_list, cmd_remove, cmd_settings};
pub use scan::{cmd_scan, cmd_watch};

/// Music Catalog CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Catalog database path
    #[arg(long, global = true, env = "MUSIC_CATALOG_DB")]
    pub db: Option<PathBuf>,

    /// Settings file path (defaults to the OS config directory)
    #[arg(long, global = true, env = "MUSIC_CATALOG_SETTINGS")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Scan every configured root, or a single directory
    Scan {
        /// Directory to scan instead of the configured roots
        path: Option<PathBuf>,
        /// Re-parse every file even if unchanged
        #[arg(short, long)]
        force: bool,
    },
    /// Watch the configured roots and keep the catalog in sync until Ctrl+C
    Watch {
        /// Skip the startup scan
        #[arg(long)]
        no_scan: bool,
        /// Show every file event
        #[arg(short, long)]
        verbose: bool,
    },
    /// Add a root directory to the library
    Add {
        /// Directory to add
        path: PathBuf,
    },
    /// Remove a root directory and every record under it
    Remove {
        /// Directory to remove
        path: PathBuf,
    },
    /// List all tracks in the catalog
    List,
    /// Show or change scan settings
    Settings {
        #[command(flatten)]
        change: SettingsChange,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;

    match &cli.command {
        Commands::Scan { path, force } => cmd_scan(&rt, cli, path.as_deref(), *force),
        Commands::Watch { no_scan, verbose } => cmd_watch(&rt, cli, !*no_scan, *verbose),
        Commands::Add { path } => cmd_add(&rt, cli, path),
        Commands::Remove { path } => cmd_remove(&rt, cli, path),
        Commands::List => cmd_list(&rt, cli),
        Commands::Settings { change } => cmd_settings(&rt, cli, change),
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Open the library with the local bridge, SQLite catalog and JSON settings.
pub(crate) async fn open_library(cli: &Cli, events: EventBus) -> anyhow::Result<Library> {
    let store = match &cli.settings {
        Some(path) => JsonSettingsStore::new(path),
        None => JsonSettingsStore::default_location()?,
    };
    let db_url = db::db_url(cli.db.as_deref());
    let catalog = SqliteCatalog::open(&db_url)
        .await
        .with_context(|| format!("Failed to open catalog at {db_url}"))?;

    let library = Library::open(
        Arc::new(LocalFileSystem),
        Arc::new(catalog),
        Arc::new(LoftyTagReader),
        Arc::new(store),
        events,
    )
    .await
    .context("Failed to load settings")?;
    Ok(library)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scan_with_global_db() {
        let cli = Cli::try_parse_from(["music-catalog", "scan", "--force", "--db", "/tmp/c.db"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/c.db")));
        assert!(matches!(cli.command, Commands::Scan { path: None, force: true }));
    }

    #[test]
    fn test_parse_settings_change() {
        let cli = Cli::try_parse_from([
            "music-catalog",
            "settings",
            "--watch",
            "false",
            "--exclude",
            "sample",
            "--exclude",
            "voice memo",
        ])
        .unwrap();
        let Commands::Settings { change } = cli.command else {
            panic!("expected settings command");
        };
        assert_eq!(change.watch, Some(false));
        assert_eq!(change.exclude, vec!["sample", "voice memo"]);
        assert!(!change.is_empty());
    }
}
