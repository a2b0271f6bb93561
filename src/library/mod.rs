//! Scan orchestration.
//!
//! [`Library`] ties discovery, change detection, extraction, the catalog and
//! the watchers together. A scan moves through
//! `Idle -> Counting -> Scanning -> Idle(outcome)`:
//!
//! 1. **Counting** enumerates every root to get a total
//! 2. **Scanning** walks the roots again, extracting through a bounded worker
//!    pool and upserting fresh parses, then prunes records whose files are gone
//!
//! Only one scan runs at a time; a second request fails with
//! [`Error::ScanInProgress`]. Watch-driven updates may run alongside a scan and
//! the last upsert for a path wins.

use futures::{StreamExt, future};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{SettingsManager, SettingsStore};
use crate::db::CatalogRepository;
use crate::error::{Error, Result};
use crate::events::{CatalogEvent, EventBus};
use crate::fs::FileSystem;
use crate::metadata::{Extraction, MetadataExtractor, TagReader};
use crate::model::{ScanProgress, ScanSummary};
use crate::scanner::{self, DiscoveryOptions, WatchManager};

/// How the last scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Success,
    WithErrors,
}

/// Where the orchestrator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Not scanning; carries the outcome of the last scan, if any
    Idle(Option<ScanOutcome>),
    Counting,
    Scanning,
}

/// The catalog sync subsystem.
pub struct Library {
    fs: Arc<dyn FileSystem>,
    catalog: Arc<dyn CatalogRepository>,
    extractor: Arc<MetadataExtractor>,
    settings: Arc<SettingsManager>,
    watcher: Arc<WatchManager>,
    events: EventBus,
    state: Mutex<ScanState>,
    progress: RwLock<ScanProgress>,
}

/// Marks a scan as running; returns the state to idle when dropped.
struct ScanGuard<'a> {
    library: &'a Library,
    outcome: Option<ScanOutcome>,
}

impl ScanGuard<'_> {
    fn enter(&self, state: ScanState) {
        *self.library.state.lock() = state;
    }

    fn finish(mut self, outcome: ScanOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        // Dropped without finish() means the scan was aborted
        let outcome = self.outcome.unwrap_or(ScanOutcome::WithErrors);
        self.library.progress.write().is_scanning = false;
        *self.library.state.lock() = ScanState::Idle(Some(outcome));
    }
}

impl Library {
    /// Wire up the subsystem and load settings from `store`.
    ///
    /// Nothing is scanned or watched until [`Library::start`].
    pub async fn open(
        fs: Arc<dyn FileSystem>,
        catalog: Arc<dyn CatalogRepository>,
        reader: Arc<dyn TagReader>,
        store: Arc<dyn SettingsStore>,
        events: EventBus,
    ) -> Result<Self> {
        let extractor = Arc::new(MetadataExtractor::new(
            Arc::clone(&fs),
            Arc::clone(&catalog),
            reader,
        ));
        let watcher = Arc::new(WatchManager::new(
            Arc::clone(&fs),
            Arc::clone(&catalog),
            Arc::clone(&extractor),
            events.clone(),
        ));
        let settings = Arc::new(
            SettingsManager::load(store, Arc::clone(&watcher), events.clone()).await?,
        );

        Ok(Self {
            fs,
            catalog,
            extractor,
            settings,
            watcher,
            events,
            state: Mutex::new(ScanState::Idle(None)),
            progress: RwLock::new(ScanProgress::default()),
        })
    }

    /// Start watchers if configured, then run the startup scan if configured.
    pub async fn start(&self) -> Result<Option<ScanSummary>> {
        let settings = self.settings.get();
        self.settings.sync_watchers();
        tracing::info!(
            target: "library::scan",
            roots = settings.roots.len(),
            watching = self.watcher.watched_roots().len(),
            "Library started"
        );
        if settings.scan_on_startup {
            self.full_scan(false).await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Stop every watcher.
    pub fn shutdown(&self) {
        let stopped = self.watcher.stop_all();
        tracing::info!(target: "library::scan", watchers = stopped, "Library stopped");
    }

    /// Scan every configured root.
    pub async fn full_scan(&self, force: bool) -> Result<ScanSummary> {
        let roots = self.settings.get().roots;
        self.run_scan(roots, force).await
    }

    /// Scan a single directory.
    pub async fn scan_directory(&self, root: &Path, force: bool) -> Result<ScanSummary> {
        self.run_scan(vec![root.to_path_buf()], force).await
    }

    /// Register a new root: persist it, watch it if enabled, and index it if
    /// auto-index is enabled.
    ///
    /// Returns `None` when the root was already configured or when indexing
    /// was deferred because another scan is running.
    pub async fn add_directory(&self, root: &Path) -> Result<Option<ScanSummary>> {
        let root = std::path::absolute(root)?;
        // Must be an accessible directory
        self.fs.list_dir(&root).await?;

        if self.settings.get().contains_root(&root) {
            tracing::debug!(target: "library::scan", root = %root.display(), "Directory already in library");
            return Ok(None);
        }

        let settings = self
            .settings
            .update(|s| s.roots.push(root.clone()))
            .await?;
        tracing::info!(target: "library::scan", root = %root.display(), "Directory added");
        self.events
            .publish(CatalogEvent::DirectoryAdded { root: root.clone() });

        if !settings.auto_index_new_files {
            return Ok(None);
        }
        match self.scan_directory(&root, false).await {
            Ok(summary) => Ok(Some(summary)),
            Err(Error::ScanInProgress) => {
                tracing::info!(target: "library::scan", root = %root.display(), "Scan in progress, new directory will be indexed by the next scan");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Forget a root: persist, stop watching, and drop every record under it.
    ///
    /// Returns the number of records removed.
    pub async fn remove_directory(&self, root: &Path) -> Result<u64> {
        let root = std::path::absolute(root)?;
        let was_configured = self.settings.get().contains_root(&root);

        self.settings
            .update(|s| s.roots.retain(|r| r != &root))
            .await?;
        self.watcher.unwatch(&root);
        let removed = self.catalog.remove_by_directory(&root).await?;

        if was_configured || removed > 0 {
            tracing::info!(target: "library::scan", root = %root.display(), removed, "Directory removed");
            self.events.publish(CatalogEvent::DirectoryRemoved {
                root,
                removed_tracks: removed,
            });
        }
        Ok(removed)
    }

    pub fn progress(&self) -> ScanProgress {
        self.progress.read().clone()
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock()
    }

    pub fn settings(&self) -> &Arc<SettingsManager> {
        &self.settings
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogRepository> {
        &self.catalog
    }

    pub fn watcher(&self) -> &Arc<WatchManager> {
        &self.watcher
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn begin_scan(&self) -> Result<ScanGuard<'_>> {
        let mut state = self.state.lock();
        if !matches!(*state, ScanState::Idle(_)) {
            return Err(Error::ScanInProgress);
        }
        *state = ScanState::Counting;
        Ok(ScanGuard {
            library: self,
            outcome: None,
        })
    }

    async fn run_scan(&self, roots: Vec<PathBuf>, force: bool) -> Result<ScanSummary> {
        let guard = self.begin_scan()?;
        *self.progress.write() = ScanProgress {
            is_scanning: true,
            ..ScanProgress::default()
        };

        let settings = self.settings.get();
        let options = DiscoveryOptions::from_settings(&settings);
        let workers = settings.scan_workers.max(1);

        tracing::info!(target: "library::scan", roots = roots.len(), force, workers, "Scan started");
        self.events.publish(CatalogEvent::ScanStarted {
            roots: roots.clone(),
            force,
        });

        let mut summary = ScanSummary::default();

        // Counting
        let mut reachable = Vec::with_capacity(roots.len());
        for root in roots {
            match scanner::discover(self.fs.as_ref(), &root, &options).await {
                Ok(files) => {
                    summary.total_files += files.filter(|item| future::ready(item.is_ok())).count().await;
                    reachable.push(root);
                }
                Err(e) => self.record_directory_error(&mut summary, &root, &e),
            }
        }
        self.progress.write().total_files = summary.total_files;

        // Scanning
        guard.enter(ScanState::Scanning);
        for root in &reachable {
            let scan = self.scan_root(root, &settings.roots, &options, workers, force, &mut summary);
            if let Err(e) = scan.await {
                if !e.is_subsystem() {
                    self.record_directory_error(&mut summary, root, &e);
                    continue;
                }
                tracing::error!(target: "library::scan", root = %root.display(), error = %e, "Scan aborted");
                self.events.publish(CatalogEvent::ScanError {
                    root: None,
                    message: e.to_string(),
                });
                return Err(e);
            }
        }

        summary.errors = self.progress.read().errors.clone();
        summary.scanned_files = self.progress.read().scanned_files;
        // Files may appear between the two passes
        summary.total_files = summary.total_files.max(summary.scanned_files);

        let outcome = if summary.has_errors() {
            ScanOutcome::WithErrors
        } else {
            ScanOutcome::Success
        };
        guard.finish(outcome);

        tracing::info!(
            target: "library::scan",
            total = summary.total_files,
            parsed = summary.parsed,
            cached = summary.cached,
            failed = summary.failed,
            removed = summary.removed,
            "Scan complete"
        );
        self.events
            .publish(CatalogEvent::ScanCompleted(summary.clone()));
        Ok(summary)
    }

    /// Walk one root, then prune records whose files were not seen.
    ///
    /// Only records the walk could have reached are pruned: nothing below an
    /// unreadable entry, nothing below another configured root, and in
    /// non-recursive mode nothing outside the root's top level.
    ///
    /// Returns an error only for enumeration or subsystem failures.
    async fn scan_root(
        &self,
        root: &Path,
        configured: &[PathBuf],
        options: &DiscoveryOptions,
        workers: usize,
        force: bool,
        summary: &mut ScanSummary,
    ) -> Result<()> {
        let files = scanner::discover(self.fs.as_ref(), root, options).await?;
        let mut seen = HashSet::new();
        let mut unreadable = Vec::new();

        let mut results = files
            .map(|item| {
                let extractor = Arc::clone(&self.extractor);
                let catalog = Arc::clone(&self.catalog);
                async move {
                    let path = match item {
                        Ok(path) => path,
                        Err(e) => return Err(e),
                    };
                    let result = match extractor.extract(&path, force).await {
                        Ok(Extraction::Parsed(track)) => match catalog.upsert(&track).await {
                            Ok(()) => Ok(Extraction::Parsed(track)),
                            Err(e) => Err(e),
                        },
                        other => other,
                    };
                    Ok((path, result))
                }
            })
            .buffer_unordered(workers);

        while let Some(scanned) = results.next().await {
            let (path, result) = match scanned {
                Ok(scanned) => scanned,
                Err(e) => {
                    let dir = match &e {
                        Error::Enumeration { path, .. } => path.clone(),
                        _ => root.to_path_buf(),
                    };
                    self.record_directory_error(summary, &dir, &e);
                    unreadable.push(dir);
                    continue;
                }
            };
            match result {
                Ok(extraction) => {
                    let fresh = extraction.is_fresh();
                    if fresh {
                        summary.parsed += 1;
                    } else {
                        summary.cached += 1;
                    }
                    self.events.publish(CatalogEvent::TrackScanned {
                        id: extraction.into_track().id,
                        path: path.clone(),
                        fresh,
                    });
                    self.advance(&path, None);
                }
                Err(e) if e.is_subsystem() => return Err(e),
                Err(e) => {
                    tracing::warn!(target: "library::scan", path = %path.display(), error = %e, "Failed to scan file");
                    summary.failed += 1;
                    self.advance(&path, Some(format!("{}: {}", path.display(), e)));
                }
            }
            seen.insert(path);
        }
        drop(results);

        let nested: Vec<&PathBuf> = configured
            .iter()
            .filter(|other| other.as_path() != root && other.starts_with(root))
            .collect();
        let prunable = |path: &Path| {
            (options.recursive || path.parent() == Some(root))
                && !nested.iter().any(|n| path.starts_with(n))
                && !unreadable.iter().any(|u| path.starts_with(u))
        };

        for stale in self.catalog.paths_under(root).await? {
            if seen.contains(&stale) || !prunable(&stale) {
                continue;
            }
            if self.catalog.remove_by_path(&stale).await? {
                tracing::debug!(target: "library::scan", path = %stale.display(), "Pruned missing file");
                summary.removed += 1;
                self.events.publish(CatalogEvent::FileRemoved { path: stale });
            }
        }
        Ok(())
    }

    /// Count one processed file and announce the new progress.
    fn advance(&self, path: &Path, error: Option<String>) {
        let (percent, scanned, total) = {
            let mut progress = self.progress.write();
            progress.scanned_files += 1;
            progress.current_file = Some(path.to_path_buf());
            if let Some(error) = error {
                progress.errors.push(error);
            }
            (progress.percent(), progress.scanned_files, progress.total_files)
        };
        tracing::trace!(target: "library::scan", percent, scanned, total, "Progress");
        self.events.publish(CatalogEvent::ScanProgress {
            percent,
            current_file: path.to_path_buf(),
            scanned,
            total,
        });
    }

    /// Record a root or directory the scan could not read.
    fn record_directory_error(&self, summary: &mut ScanSummary, dir: &Path, error: &Error) {
        let message = format!("{}: {}", dir.display(), error);
        tracing::warn!(target: "library::scan", dir = %dir.display(), error = %error, "Skipping unreadable directory");
        summary.directory_errors.push(message.clone());
        self.events.publish(CatalogEvent::ScanError {
            root: Some(dir.to_path_buf()),
            message,
        });
    }
}
