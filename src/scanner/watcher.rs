//! Filesystem watching for library roots.
//!
//! Uses the `notify` crate (through `notify-debouncer-full`) to keep one
//! subscription per root and translate raw OS events into catalog operations.
//!
//! # Design
//!
//! - **Owned table**: [`WatchManager`] maps each root to its [`WatcherHandle`];
//!   at most one handle exists per root
//! - **Debounced events**: rapid changes coalesce before translation
//! - **Translation on the debouncer thread**: paths are filtered and turned
//!   into [`WatchEvent`]s there, then applied on the tokio runtime
//! - **Independent operations**: a failing operation is reported as
//!   `watcherError` and the watcher keeps running
//!
//! Dropping a handle releases the OS subscription. Events missed while a root
//! was not watched are not replayed; the next scan picks them up.
//!
//! The debouncer thread hands events to the runtime over a bounded queue of
//! [`EVENT_QUEUE_CAPACITY`]; when it is full the debouncer thread blocks.
//!
//! Translation classifies ambiguous events (directory or file, still present
//! or gone) with a direct stat from the debouncer thread, see
//! [`is_dir_on_disk`]. That thread is synchronous, and the paths come from the
//! OS watch on a local root, so this is the one filesystem touch that does not
//! go through [`FileSystem`].

use futures::StreamExt;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ScanSettings;
use crate::db::CatalogRepository;
use crate::error::{Error, Result};
use crate::events::{CatalogEvent, EventBus};
use crate::fs::FileSystem;
use crate::metadata::{Extraction, MetadataExtractor};
use crate::scanner::{self, DiscoveryOptions};

/// Translated events buffered between the debouncer thread and the runtime.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// How a root is watched. A change here replaces the root's handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    pub filter: DiscoveryOptions,
    pub debounce: Duration,
    /// Index appeared files immediately
    pub auto_index: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::from_settings(&ScanSettings::default())
    }
}

impl WatchOptions {
    pub fn from_settings(settings: &ScanSettings) -> Self {
        Self {
            filter: DiscoveryOptions::from_settings(settings),
            debounce: Duration::from_millis(settings.watch_debounce_ms),
            auto_index: settings.auto_index_new_files,
        }
    }
}

/// Operation translated from a raw filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// An audio file was created or renamed into place
    Appeared(PathBuf),
    /// An audio file's contents or metadata changed
    Changed(PathBuf),
    /// An audio file was deleted or renamed away
    Disappeared(PathBuf),
    /// A directory was created (may contain audio files)
    DirectoryAppeared(PathBuf),
    /// A directory was deleted with everything below it
    DirectoryDisappeared(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            Self::Appeared(p)
            | Self::Changed(p)
            | Self::Disappeared(p)
            | Self::DirectoryAppeared(p)
            | Self::DirectoryDisappeared(p) => p,
        }
    }
}

/// Errors that can occur while establishing a watch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {0}")]
    Init(String),
    #[error("Failed to watch {0}: {1}")]
    Watch(PathBuf, String),
    #[error("Watching requires a running tokio runtime")]
    NoRuntime,
}

/// What the debouncer thread hands to the runtime.
#[derive(Debug)]
enum Signal {
    Event(WatchEvent),
    Error(String),
}

/// A live subscription for one root.
///
/// Dropping it stops the OS watch and the task applying its events.
pub struct WatcherHandle {
    root: PathBuf,
    options: WatchOptions,
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!(target: "scanner::watcher", root = %self.root.display(), "Watcher stopped");
    }
}

/// Owner of every [`WatcherHandle`], keyed by root.
pub struct WatchManager {
    handles: Mutex<HashMap<PathBuf, WatcherHandle>>,
    applier: Arc<ChangeApplier>,
}

impl WatchManager {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        catalog: Arc<dyn CatalogRepository>,
        extractor: Arc<MetadataExtractor>,
        events: EventBus,
    ) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            applier: Arc::new(ChangeApplier {
                fs,
                catalog,
                extractor,
                events,
            }),
        }
    }

    /// Start watching `root`. Returns `false` if it was already watched.
    pub fn watch(&self, root: &Path, options: &WatchOptions) -> std::result::Result<bool, WatchError> {
        if self.handles.lock().contains_key(root) {
            return Ok(false);
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WatchError::NoRuntime)?;
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let watch_root = root.to_path_buf();
        let filter = options.filter.clone();
        let mut debouncer = new_debouncer(options.debounce, None, move |result: DebounceEventResult| {
            forward(&tx, &watch_root, &filter, result);
        })
        .map_err(|e| WatchError::Init(e.to_string()))?;

        let mode = if options.filter.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        debouncer
            .watch(root, mode)
            .map_err(|e| WatchError::Watch(root.to_path_buf(), e.to_string()))?;

        let task = runtime.spawn(run_loop(
            root.to_path_buf(),
            options.clone(),
            rx,
            Arc::clone(&self.applier),
        ));

        let handle = WatcherHandle {
            root: root.to_path_buf(),
            options: options.clone(),
            _debouncer: debouncer,
            task,
        };

        let mut handles = self.handles.lock();
        if handles.contains_key(root) {
            // Lost a race with another watch() for the same root
            return Ok(false);
        }
        handles.insert(root.to_path_buf(), handle);
        tracing::info!(target: "scanner::watcher", root = %root.display(), recursive = options.filter.recursive, "Watching directory");
        Ok(true)
    }

    /// Stop watching `root`. Returns `false` if it was not watched.
    pub fn unwatch(&self, root: &Path) -> bool {
        let removed = self.handles.lock().remove(root);
        if removed.is_some() {
            tracing::info!(target: "scanner::watcher", root = %root.display(), "Unwatching directory");
        }
        removed.is_some()
    }

    /// Stop every watcher; returns how many were running.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<WatcherHandle> = self.handles.lock().drain().map(|(_, h)| h).collect();
        drained.len()
    }

    pub fn is_watching(&self, root: &Path) -> bool {
        self.handles.lock().contains_key(root)
    }

    /// Watched roots, sorted.
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.handles.lock().keys().cloned().collect();
        roots.sort();
        roots
    }

    /// Bring the table in line with `settings`.
    ///
    /// Handles for removed roots, or whose options changed, are dropped. Roots
    /// that cannot be watched are reported as `watcherError`.
    pub fn sync(&self, settings: &ScanSettings) {
        let desired: Vec<PathBuf> = if settings.watch_for_changes {
            settings.roots.clone()
        } else {
            Vec::new()
        };
        let options = WatchOptions::from_settings(settings);

        let stale: Vec<WatcherHandle> = {
            let mut handles = self.handles.lock();
            let keys: Vec<PathBuf> = handles
                .iter()
                .filter(|(root, handle)| !desired.contains(root) || handle.options != options)
                .map(|(root, _)| root.clone())
                .collect();
            keys.iter().filter_map(|k| handles.remove(k)).collect()
        };
        for handle in &stale {
            tracing::info!(target: "scanner::watcher", root = %handle.root().display(), "Unwatching directory");
        }
        drop(stale);

        for root in &desired {
            if let Err(e) = self.watch(root, &options) {
                tracing::warn!(target: "scanner::watcher", root = %root.display(), error = %e, "Cannot watch root");
                self.applier.events.publish(CatalogEvent::WatcherError {
                    root: root.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Apply one translated event as the watcher for `root` would.
    pub async fn apply(&self, root: &Path, event: WatchEvent, options: &WatchOptions) -> Result<()> {
        self.applier.apply(root, event, options).await
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Translate a debouncer batch and queue it for the runtime.
///
/// Runs on the debouncer thread. Blocks while the queue is full; a closed
/// queue (the handle was dropped) discards the rest of the batch.
fn forward(tx: &mpsc::Sender<Signal>, root: &Path, filter: &DiscoveryOptions, result: DebounceEventResult) {
    let signals: Vec<Signal> = match result {
        Ok(events) => events
            .iter()
            .flat_map(|event| translate(root, filter, &event.event))
            .inspect(|op| tracing::debug!(target: "scanner::watcher", op = ?op, "File event"))
            .map(Signal::Event)
            .collect(),
        Err(errors) => errors.iter().map(|e| Signal::Error(e.to_string())).collect(),
    };
    for signal in signals {
        if tx.blocking_send(signal).is_err() {
            break;
        }
    }
}

async fn run_loop(
    root: PathBuf,
    options: WatchOptions,
    mut rx: mpsc::Receiver<Signal>,
    applier: Arc<ChangeApplier>,
) {
    while let Some(signal) = rx.recv().await {
        match signal {
            Signal::Event(event) => {
                let path = event.path().to_path_buf();
                if let Err(e) = applier.apply(&root, event, &options).await {
                    tracing::warn!(target: "scanner::watcher", path = %path.display(), error = %e, "Failed to apply change");
                    applier.events.publish(CatalogEvent::WatcherError {
                        root: root.clone(),
                        message: format!("{}: {}", path.display(), e),
                    });
                }
            }
            Signal::Error(message) => {
                tracing::warn!(target: "scanner::watcher", root = %root.display(), error = %message, "Watch error");
                applier.events.publish(CatalogEvent::WatcherError {
                    root: root.clone(),
                    message,
                });
            }
        }
    }
}

/// Turns [`WatchEvent`]s into catalog writes.
struct ChangeApplier {
    fs: Arc<dyn FileSystem>,
    catalog: Arc<dyn CatalogRepository>,
    extractor: Arc<MetadataExtractor>,
    events: EventBus,
}

impl ChangeApplier {
    async fn apply(&self, root: &Path, event: WatchEvent, options: &WatchOptions) -> Result<()> {
        match event {
            WatchEvent::Appeared(path) => {
                let indexed = options.auto_index;
                if indexed {
                    self.index(&path).await?;
                }
                self.events.publish(CatalogEvent::FileAdded { path, indexed });
            }
            WatchEvent::Changed(path) => match self.index(&path).await {
                Ok(_) => self.events.publish(CatalogEvent::FileChanged { path }),
                // Replaced by a rename or deleted before we got to it
                Err(Error::NotFound(_)) => self.remove(path).await?,
                Err(e) => return Err(e),
            },
            WatchEvent::Disappeared(path) => self.remove(path).await?,
            WatchEvent::DirectoryAppeared(dir) => self.index_directory(root, &dir, options).await?,
            WatchEvent::DirectoryDisappeared(dir) => {
                let paths = self.catalog.paths_under(&dir).await?;
                if paths.is_empty() {
                    return Ok(());
                }
                let removed = self.catalog.remove_by_directory(&dir).await?;
                tracing::debug!(target: "scanner::watcher", dir = %dir.display(), removed, "Directory removed");
                for path in paths {
                    self.events.publish(CatalogEvent::FileRemoved { path });
                }
            }
        }
        Ok(())
    }

    /// Extract (unforced) and upsert when the parse is fresh.
    async fn index(&self, path: &Path) -> Result<Extraction> {
        let extraction = self.extractor.extract(path, false).await?;
        if let Extraction::Parsed(track) = &extraction {
            self.catalog.upsert(track).await?;
        }
        Ok(extraction)
    }

    async fn remove(&self, path: PathBuf) -> Result<()> {
        if self.catalog.remove_by_path(&path).await? {
            self.events.publish(CatalogEvent::FileRemoved { path });
        }
        Ok(())
    }

    /// Index every candidate below a newly created directory.
    ///
    /// Per-file failures are reported and skipped.
    async fn index_directory(&self, root: &Path, dir: &Path, options: &WatchOptions) -> Result<()> {
        let mut files = scanner::discover(self.fs.as_ref(), dir, &options.filter).await?;
        while let Some(item) = files.next().await {
            let path = match item {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(target: "scanner::watcher", dir = %dir.display(), error = %e, "Unreadable entry in new directory");
                    self.events.publish(CatalogEvent::WatcherError {
                        root: root.to_path_buf(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if !options.auto_index {
                self.events.publish(CatalogEvent::FileAdded { path, indexed: false });
                continue;
            }
            match self.index(&path).await {
                Ok(_) => self.events.publish(CatalogEvent::FileAdded { path, indexed: true }),
                Err(e) if e.is_subsystem() => return Err(e),
                Err(e) => {
                    tracing::warn!(target: "scanner::watcher", path = %path.display(), error = %e, "Failed to index new file");
                    self.events.publish(CatalogEvent::WatcherError {
                        root: root.to_path_buf(),
                        message: format!("{}: {}", path.display(), e),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Translate one raw event for a watch on `root`.
///
/// Renames become disappeared + appeared. Paths outside the filter (hidden,
/// excluded, wrong extension, too deep) are dropped.
pub fn translate(root: &Path, filter: &DiscoveryOptions, event: &notify::Event) -> Vec<WatchEvent> {
    let mut ops = Vec::new();
    match event.kind {
        EventKind::Create(kind) => {
            for path in &event.paths {
                if kind == CreateKind::Folder || (kind != CreateKind::File && is_dir_on_disk(path) == Some(true)) {
                    push_dir(&mut ops, root, filter, WatchEvent::DirectoryAppeared(path.clone()));
                } else {
                    push_file(&mut ops, root, filter, WatchEvent::Appeared(path.clone()));
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
            (RenameMode::Both, [from, to]) => {
                rename_away(&mut ops, root, filter, from);
                rename_into(&mut ops, root, filter, to);
            }
            (RenameMode::From, [from, ..]) => rename_away(&mut ops, root, filter, from),
            (RenameMode::To, [to, ..]) => rename_into(&mut ops, root, filter, to),
            (_, paths) => {
                for path in paths {
                    if is_dir_on_disk(path).is_some() {
                        rename_into(&mut ops, root, filter, path);
                    } else {
                        rename_away(&mut ops, root, filter, path);
                    }
                }
            }
        },
        EventKind::Modify(_) => {
            for path in &event.paths {
                if is_dir_on_disk(path) != Some(true) {
                    push_file(&mut ops, root, filter, WatchEvent::Changed(path.clone()));
                }
            }
        }
        EventKind::Remove(kind) => {
            for path in &event.paths {
                match kind {
                    RemoveKind::Folder => {
                        push_dir(&mut ops, root, filter, WatchEvent::DirectoryDisappeared(path.clone()))
                    }
                    RemoveKind::File => {
                        push_file(&mut ops, root, filter, WatchEvent::Disappeared(path.clone()))
                    }
                    // The path is gone, so guess from the extension
                    _ if filter.has_accepted_extension(path) => {
                        push_file(&mut ops, root, filter, WatchEvent::Disappeared(path.clone()))
                    }
                    _ => push_dir(&mut ops, root, filter, WatchEvent::DirectoryDisappeared(path.clone())),
                }
            }
        }
        _ => {}
    }
    ops
}

fn rename_away(ops: &mut Vec<WatchEvent>, root: &Path, filter: &DiscoveryOptions, path: &Path) {
    if filter.has_accepted_extension(path) {
        push_file(ops, root, filter, WatchEvent::Disappeared(path.to_path_buf()));
    } else {
        push_dir(ops, root, filter, WatchEvent::DirectoryDisappeared(path.to_path_buf()));
    }
}

fn rename_into(ops: &mut Vec<WatchEvent>, root: &Path, filter: &DiscoveryOptions, path: &Path) {
    if is_dir_on_disk(path) == Some(true) {
        push_dir(ops, root, filter, WatchEvent::DirectoryAppeared(path.to_path_buf()));
    } else {
        push_file(ops, root, filter, WatchEvent::Appeared(path.to_path_buf()));
    }
}

fn push_file(ops: &mut Vec<WatchEvent>, root: &Path, filter: &DiscoveryOptions, op: WatchEvent) {
    let path = op.path();
    if is_visible(root, filter, path, 1) && filter.has_accepted_extension(path) {
        ops.push(op);
    }
}

fn push_dir(ops: &mut Vec<WatchEvent>, root: &Path, filter: &DiscoveryOptions, op: WatchEvent) {
    // Without recursion nothing below the root is in the catalog
    if filter.recursive && is_visible(root, filter, op.path(), 1) {
        ops.push(op);
    }
}

/// `Some(is_dir)` when `path` exists, `None` when it is gone.
///
/// Called from the debouncer thread only.
pub fn is_dir_on_disk(path: &Path) -> Option<bool> {
    std::fs::metadata(path).ok().map(|m| m.is_dir())
}

/// Not hidden, not excluded, and within `max_depth` of the root when
/// recursion is off.
fn is_visible(root: &Path, filter: &DiscoveryOptions, path: &Path, max_depth: usize) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if scanner::is_hidden(name) || filter.is_excluded(name) {
        return false;
    }
    if filter.recursive {
        return true;
    }
    path.strip_prefix(root)
        .map(|rel| rel.components().count() <= max_depth)
        .unwrap_or(false)
}
