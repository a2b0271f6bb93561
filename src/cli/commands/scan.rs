//! Scanning and file watching commands.

use std::io::Write;
use std::path::Path;
use tokio::runtime::Runtime;
use tracing::info;

use super::{Cli, open_library};
use crate::events::{CatalogEvent, EventBus};
use crate::model::ScanSummary;

/// Scan the configured roots, or one directory
pub fn cmd_scan(rt: &Runtime, cli: &Cli, path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    rt.block_on(scan(cli, path, force))
}

async fn scan(cli: &Cli, path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let events = EventBus::new();
    let _progress = events.subscribe(print_progress);
    let library = open_library(cli, events.clone()).await?;

    let summary = match path {
        Some(path) => {
            println!("Scanning directory: {}", path.display());
            library.scan_directory(&std::path::absolute(path)?, force).await?
        }
        None => {
            let roots = library.settings().get().roots;
            if roots.is_empty() {
                println!("No directories configured. Add one with `music-catalog add <path>`.");
                return Ok(());
            }
            println!("Scanning {} configured director{}", roots.len(), if roots.len() == 1 { "y" } else { "ies" });
            library.full_scan(force).await?
        }
    };

    println!();
    print_summary(&summary);
    Ok(())
}

/// Watch the configured roots until Ctrl+C
pub fn cmd_watch(rt: &Runtime, cli: &Cli, scan_first: bool, verbose: bool) -> anyhow::Result<()> {
    rt.block_on(watch(cli, scan_first, verbose))
}

async fn watch(cli: &Cli, scan_first: bool, verbose: bool) -> anyhow::Result<()> {
    let events = EventBus::new();
    let _printer = events.subscribe(move |event| print_watch_event(event, verbose));
    let library = open_library(cli, events.clone()).await?;

    // The startup scan follows the flag, not the stored setting
    library.settings().sync_watchers();
    if scan_first {
        println!("Running incremental scan...");
        let summary = library.full_scan(false).await?;
        println!();
        print_summary(&summary);
    }

    let roots = library.watcher().watched_roots();
    if roots.is_empty() {
        println!("Nothing to watch. Check that directories are configured and watching is enabled.");
        return Ok(());
    }
    for root in &roots {
        println!("Watching for changes in: {}", root.display());
    }
    println!("Press Ctrl+C to stop.\n");
    info!(target: "scanner::watcher", roots = roots.len(), "File watcher started");

    tokio::signal::ctrl_c().await?;
    library.shutdown();
    info!(target: "scanner::watcher", "File watcher stopped");
    Ok(())
}

fn print_progress(event: &CatalogEvent) {
    match event {
        CatalogEvent::ScanProgress {
            percent,
            scanned,
            total,
            ..
        } => {
            print!("\rScanned {scanned}/{total} files ({percent}%)");
            let _ = std::io::stdout().flush();
        }
        CatalogEvent::ScanError { root, message } => match root {
            Some(root) => eprintln!("\nCannot scan {}: {}", root.display(), message),
            None => eprintln!("\nScan aborted: {message}"),
        },
        _ => {}
    }
}

fn print_watch_event(event: &CatalogEvent, verbose: bool) {
    match event {
        CatalogEvent::FileAdded { path, indexed } => {
            let note = if *indexed { "" } else { " (not indexed)" };
            println!("+ ADDED: {}{}", path.display(), note);
        }
        CatalogEvent::FileChanged { path } if verbose => println!("~ CHANGED: {}", path.display()),
        CatalogEvent::FileRemoved { path } => println!("- REMOVED: {}", path.display()),
        CatalogEvent::WatcherError { root, message } => {
            eprintln!("! ERROR ({}): {}", root.display(), message)
        }
        _ => print_progress(event),
    }
}

fn print_summary(summary: &ScanSummary) {
    println!(
        "Scan complete: {} files, {} parsed, {} unchanged, {} failed, {} removed.",
        summary.total_files, summary.parsed, summary.cached, summary.failed, summary.removed
    );
    for error in summary.directory_errors.iter().chain(&summary.errors) {
        eprintln!("  {error}");
    }
}
