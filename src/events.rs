//! Publish-subscribe notifications for progress display and tooling.
//!
//! [`EventBus`] delivers typed [`CatalogEvent`]s to callbacks registered with
//! [`EventBus::subscribe`]. Each registration returns a [`Subscription`];
//! dropping it (or calling [`Subscription::unsubscribe`]) removes the
//! callback. A panicking subscriber is logged and skipped, the remaining
//! subscribers still receive the event.
//!
//! The event set is additive-only.

use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use crate::config::ScanSettings;
use crate::model::{ScanSummary, TrackId};

/// Everything the catalog announces.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    /// A root directory was added to the settings
    DirectoryAdded { root: PathBuf },
    /// A root directory was removed along with its records
    DirectoryRemoved { root: PathBuf, removed_tracks: u64 },
    /// A scan began; progress counters are back at zero
    ScanStarted { roots: Vec<PathBuf>, force: bool },
    /// One more file was processed
    ScanProgress {
        percent: u8,
        current_file: PathBuf,
        scanned: usize,
        total: usize,
    },
    /// A scan finished, with or without errors
    ScanCompleted(ScanSummary),
    /// A root could not be enumerated, or the scan was aborted
    ScanError {
        root: Option<PathBuf>,
        message: String,
    },
    /// A file was processed by a scan (`fresh` when it was parsed)
    TrackScanned {
        id: TrackId,
        path: PathBuf,
        fresh: bool,
    },
    /// A file appeared under a watched root
    FileAdded { path: PathBuf, indexed: bool },
    /// A watched file changed and was re-indexed if needed
    FileChanged { path: PathBuf },
    /// A record was removed because its file is gone
    FileRemoved { path: PathBuf },
    /// A watcher reported an error or failed to apply a change
    WatcherError { root: PathBuf, message: String },
    /// Settings were persisted
    SettingsUpdated(ScanSettings),
}

impl CatalogEvent {
    /// Stable event name for logs and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectoryAdded { .. } => "directoryAdded",
            Self::DirectoryRemoved { .. } => "directoryRemoved",
            Self::ScanStarted { .. } => "scanStarted",
            Self::ScanProgress { .. } => "scanProgress",
            Self::ScanCompleted(_) => "scanCompleted",
            Self::ScanError { .. } => "scanError",
            Self::TrackScanned { .. } => "trackScanned",
            Self::FileAdded { .. } => "fileAdded",
            Self::FileChanged { .. } => "fileChanged",
            Self::FileRemoved { .. } => "fileRemoved",
            Self::WatcherError { .. } => "watcherError",
            Self::SettingsUpdated(_) => "settingsUpdated",
        }
    }
}

type Callback = Arc<dyn Fn(&CatalogEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(u64, Callback)>>,
}

/// Cheaply cloneable handle to a shared subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. It stays registered while the returned
    /// [`Subscription`] is alive.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CatalogEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push((id, Arc::new(callback)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Forward every event into an unbounded channel.
    #[must_use = "dropping the subscription closes the channel"]
    pub fn channel(&self) -> (Subscription, mpsc::UnboundedReceiver<CatalogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// Deliver `event` to every subscriber.
    pub fn publish(&self, event: CatalogEvent) {
        // Snapshot so callbacks may subscribe/unsubscribe without deadlocking
        let subscribers: Vec<Callback> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        tracing::trace!(target: "events", event = event.name(), subscribers = subscribers.len(), "Publishing");
        for callback in subscribers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(target: "events", event = event.name(), error = %message, "Event subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

/// Registration handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the callback now.
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.subscribers.write().retain(|(id, _)| *id != self.id);
        }
    }
}
