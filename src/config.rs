//! Scan settings and their persistence.
//!
//! Settings live in a JSON file in the OS-standard config directory:
//! - Windows: %APPDATA%\music-catalog\settings.json
//! - macOS: ~/Library/Application Support/music-catalog/settings.json
//! - Linux: ~/.config/music-catalog/settings.json
//!
//! The file is read at startup and rewritten atomically on every mutation.
//! [`SettingsManager`] is the single writer; changing watch-related fields
//! starts or stops the affected watchers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::events::{CatalogEvent, EventBus};
use crate::scanner::WatchManager;

/// Extensions accepted when the settings file does not say otherwise.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "opus", "m4a", "aac", "wav", "aiff", "wv", "ape",
];

/// What to scan and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Root directories of the library
    pub roots: Vec<PathBuf>,

    /// Descend into subdirectories
    pub recursive: bool,

    /// Accepted file extensions (lowercase, no dot)
    pub extensions: Vec<String>,

    /// Case-insensitive substrings; matching file names are skipped
    pub exclude_patterns: Vec<String>,

    /// Keep a filesystem watch on every root
    pub watch_for_changes: bool,

    /// Run a full scan when the library starts
    pub scan_on_startup: bool,

    /// Index files as soon as they appear (watcher) or a root is added
    pub auto_index_new_files: bool,

    /// Files extracted concurrently during a scan
    pub scan_workers: usize,

    /// Debounce window for filesystem events
    pub watch_debounce_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            recursive: true,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude_patterns: Vec::new(),
            watch_for_changes: true,
            scan_on_startup: true,
            auto_index_new_files: true,
            scan_workers: 4,
            watch_debounce_ms: 500,
        }
    }
}

impl ScanSettings {
    pub fn contains_root(&self, root: &Path) -> bool {
        self.roots.iter().any(|r| r == root)
    }

    /// Drop duplicate roots and normalize extensions.
    fn normalize(&mut self) {
        let mut seen = Vec::with_capacity(self.roots.len());
        self.roots.retain(|root| {
            if seen.contains(root) {
                false
            } else {
                seen.push(root.clone());
                true
            }
        });
        let mut extensions: Vec<String> = Vec::with_capacity(self.extensions.len());
        for ext in &self.extensions {
            let ext = ext.trim().trim_start_matches('.').to_lowercase();
            if !ext.is_empty() && !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        self.extensions = extensions;
        if self.scan_workers == 0 {
            self.scan_workers = 1;
        }
    }
}

// ============================================================================
// Settings Store
// ============================================================================

/// Where settings are persisted.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read persisted settings; `None` when nothing has been saved yet.
    async fn load(&self) -> std::result::Result<Option<ScanSettings>, ConfigError>;

    /// Persist settings, replacing the previous value atomically.
    async fn save(&self, settings: &ScanSettings) -> std::result::Result<(), ConfigError>;
}

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("music-catalog"))
}

/// Get the full path to the settings file
pub fn settings_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("settings.json"))
}

/// JSON file settings store.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the OS-standard location.
    pub fn default_location() -> std::result::Result<Self, ConfigError> {
        settings_path().map(Self::new).ok_or(ConfigError::NoConfigDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self) -> std::result::Result<Option<ScanSettings>, ConfigError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(target: "config", path = %self.path.display(), "No settings file found, using defaults");
                return Ok(None);
            }
            Err(e) => return Err(ConfigError::Read(self.path.clone(), e)),
        };
        let settings = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::Parse(self.path.clone(), e))?;
        tracing::info!(target: "config", path = %self.path.display(), "Loaded settings");
        Ok(Some(settings))
    }

    async fn save(&self, settings: &ScanSettings) -> std::result::Result<(), ConfigError> {
        let path = self.path.clone();
        let settings = settings.clone();
        // Moved to a blocking thread so the rename happens off the runtime
        tokio::task::spawn_blocking(move || write_atomically(&path, &settings))
            .await
            .map_err(|e| ConfigError::TaskJoin(e.to_string()))?
    }
}

/// Write settings to `path` via a temp file and rename.
///
/// Creates the parent directory if it doesn't exist.
pub fn write_atomically(path: &Path, settings: &ScanSettings) -> std::result::Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = serde_json::to_string_pretty(settings).map_err(ConfigError::Serialize)?;

    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!(target: "config", path = %path.display(), "Saved settings");
    Ok(())
}

// ============================================================================
// Settings Manager
// ============================================================================

/// Owner of the live [`ScanSettings`].
///
/// Mutations are serialized, persisted before they become visible, and
/// announced with [`CatalogEvent::SettingsUpdated`].
pub struct SettingsManager {
    settings: parking_lot::RwLock<ScanSettings>,
    store: Arc<dyn SettingsStore>,
    watcher: Arc<WatchManager>,
    events: EventBus,
    write_lock: tokio::sync::Mutex<()>,
}

impl SettingsManager {
    /// Load settings from `store`; defaults are used (not written) when the
    /// store is empty.
    pub async fn load(
        store: Arc<dyn SettingsStore>,
        watcher: Arc<WatchManager>,
        events: EventBus,
    ) -> Result<Self> {
        let mut settings = store.load().await?.unwrap_or_default();
        settings.normalize();
        Ok(Self {
            settings: parking_lot::RwLock::new(settings),
            store,
            watcher,
            events,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> ScanSettings {
        self.settings.read().clone()
    }

    /// Replace the settings wholesale.
    pub async fn set(&self, settings: ScanSettings) -> Result<ScanSettings> {
        self.update(move |current| *current = settings).await
    }

    /// Apply `change` to a copy of the settings, persist it, then publish.
    ///
    /// If persisting fails the in-memory settings are left untouched.
    pub async fn update<F>(&self, change: F) -> Result<ScanSettings>
    where
        F: FnOnce(&mut ScanSettings),
    {
        let _guard = self.write_lock.lock().await;

        let current = self.get();
        let mut next = current.clone();
        change(&mut next);
        next.normalize();
        if next == current {
            return Ok(next);
        }

        self.store.save(&next).await?;
        *self.settings.write() = next.clone();

        tracing::debug!(target: "config", roots = next.roots.len(), watch = next.watch_for_changes, "Settings updated");
        self.events
            .publish(CatalogEvent::SettingsUpdated(next.clone()));
        self.watcher.sync(&next);
        Ok(next)
    }

    /// Bring the watcher table in line with the current settings.
    pub fn sync_watchers(&self) {
        self.watcher.sync(&self.get());
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to read settings from {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Failed to parse settings file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(serde_json::Error),

    #[error("Failed to write settings to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("Settings store unavailable: {0}")]
    Unavailable(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

// ============================================================================
// Tests
// ============================================================================
