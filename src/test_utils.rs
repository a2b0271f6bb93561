//! Test utilities and fixtures for music-catalog tests.
//!
//! In-memory stand-ins for every seam (file bridge, catalog, tag reader,
//! settings store) plus an event recorder, so orchestration logic can be
//! tested without touching disk.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{fake_audio, test_library};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let t = test_library(ScanSettings::default()).await;
//!     t.fs.add_file("/music/a.mp3", fake_audio("Song A"), 1_000);
//!     // ... test logic
//! }
//! ```

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::{ConfigError, ScanSettings, SettingsStore};
use crate::db::CatalogRepository;
use crate::error::{Error, Result};
use crate::events::{CatalogEvent, EventBus, Subscription};
use crate::fs::{FileStat, FileSystem};
use crate::library::Library;
use crate::metadata::{EmbeddedPicture, MetadataExtractor, ParsedTags, TagReader};
use crate::model::{Track, TrackId, TrackSource};
use crate::scanner::{self, Discovered, DiscoveryOptions, WatchManager};

// ============================================================================
// File system
// ============================================================================

#[derive(Default)]
struct MemoryTree {
    files: BTreeMap<PathBuf, (Vec<u8>, i64)>,
    dirs: BTreeSet<PathBuf>,
    failing: HashSet<PathBuf>,
}

/// In-memory [`FileSystem`]. Directories exist implicitly above every file.
#[derive(Default)]
pub struct MemoryFileSystem {
    tree: Mutex<MemoryTree>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a file.
    pub fn add_file(&self, path: impl Into<PathBuf>, bytes: Vec<u8>, modified: i64) {
        let path = path.into();
        let mut tree = self.tree.lock();
        for ancestor in path.ancestors().skip(1) {
            tree.dirs.insert(ancestor.to_path_buf());
        }
        tree.files.insert(path, (bytes, modified));
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        self.tree.lock().files.remove(path.as_ref());
    }

    /// Change a file's modification time, keeping its contents.
    pub fn touch(&self, path: impl AsRef<Path>, modified: i64) {
        if let Some(entry) = self.tree.lock().files.get_mut(path.as_ref()) {
            entry.1 = modified;
        }
    }

    /// Make a directory unreadable. As a root it rejects enumeration; below a
    /// root it is reported as an error item and its files are not listed.
    pub fn fail_dir(&self, path: impl Into<PathBuf>) {
        self.tree.lock().failing.insert(path.into());
    }

    fn check_dir(tree: &MemoryTree, dir: &Path) -> Result<()> {
        if tree.failing.contains(dir) {
            return Err(Error::enumeration(dir, "Permission denied"));
        }
        if !tree.dirs.contains(dir) {
            return Err(Error::enumeration(dir, "No such directory"));
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn enumerate(
        &self,
        root: &Path,
        options: &DiscoveryOptions,
    ) -> Result<BoxStream<'static, Discovered>> {
        let tree = self.tree.lock();
        Self::check_dir(&tree, root)?;
        let hidden = |p: &Path| {
            p.strip_prefix(root).is_ok_and(|rel| {
                rel.components()
                    .any(|c| c.as_os_str().to_str().is_some_and(scanner::is_hidden))
            })
        };
        let reachable = |p: &Path| options.recursive || p.parent() == Some(root);
        let failing: Vec<PathBuf> = tree
            .failing
            .iter()
            .filter(|d| d.starts_with(root) && d.as_path() != root)
            .filter(|d| reachable(d.as_path()) && !hidden(d.as_path()))
            .cloned()
            .collect();
        let mut items: Vec<Discovered> = failing
            .iter()
            .map(|d| Err(Error::enumeration(d, "Permission denied")))
            .collect();
        items.extend(
            tree.files
                .keys()
                .filter(|p| p.starts_with(root))
                .filter(|p| reachable(p.as_path()) && !hidden(p.as_path()))
                .filter(|p| !failing.iter().any(|d| p.starts_with(d)))
                .filter(|p| options.accepts(p))
                .cloned()
                .map(Ok),
        );
        Ok(futures::stream::iter(items).boxed())
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        self.tree
            .lock()
            .files
            .get(path)
            .map(|(bytes, modified)| FileStat {
                size: bytes.len() as u64,
                modified: *modified,
            })
            .ok_or_else(|| Error::not_found(path))
    }

    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        self.tree
            .lock()
            .files
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| Error::not_found(path))
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let tree = self.tree.lock();
        Self::check_dir(&tree, dir).map_err(|_| Error::not_found(dir))?;
        Ok(tree
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// In-memory [`CatalogRepository`] with write counters and an outage switch.
#[derive(Default)]
pub struct MemoryCatalog {
    tracks: Mutex<BTreeMap<PathBuf, Track>>,
    upserts: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record directly, bypassing counters.
    pub fn insert(&self, track: Track) {
        self.tracks.lock().insert(track.path.clone(), track);
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<Track> {
        self.tracks.lock().get(path.as_ref()).cloned()
    }

    pub fn len(&self) -> usize {
        self.tracks.lock().len()
    }

    /// Every record, ordered by path.
    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.lock().values().cloned().collect()
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::catalog("catalog offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CatalogRepository for MemoryCatalog {
    async fn find_by_path(&self, path: &Path) -> Result<Option<Track>> {
        self.check()?;
        Ok(self.get(path))
    }

    async fn upsert(&self, track: &Track) -> Result<()> {
        self.check()?;
        let mut tracks = self.tracks.lock();
        let mut track = track.clone();
        if let Some(existing) = tracks.get(&track.path) {
            track.date_added = existing.date_added;
        }
        tracks.insert(track.path.clone(), track);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_by_path(&self, path: &Path) -> Result<bool> {
        self.check()?;
        Ok(self.tracks.lock().remove(path).is_some())
    }

    async fn remove_by_directory(&self, dir: &Path) -> Result<u64> {
        self.check()?;
        let mut tracks = self.tracks.lock();
        let before = tracks.len();
        tracks.retain(|path, _| !path.starts_with(dir));
        Ok((before - tracks.len()) as u64)
    }

    async fn paths_under(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.check()?;
        Ok(self
            .tracks
            .lock()
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect())
    }

    async fn all_tracks(&self) -> Result<Vec<Track>> {
        self.check()?;
        Ok(self.snapshot())
    }
}

// ============================================================================
// Tag reader
// ============================================================================

/// [`TagReader`] for `key=value` text files.
///
/// Empty input, or input containing `CORRUPT`, fails like a broken file.
/// Keys: title, artist, album, duration, codec, format, bitrate,
/// sample_rate, track, year, genre, picture (a mime type).
pub struct FakeTagReader;

impl TagReader for FakeTagReader {
    fn read_tags(&self, path: &Path, bytes: &[u8]) -> Result<ParsedTags> {
        let text = String::from_utf8_lossy(bytes);
        if text.trim().is_empty() {
            return Err(Error::metadata(path, "File is empty"));
        }
        if text.contains("CORRUPT") {
            return Err(Error::metadata(path, "Invalid frame header"));
        }

        let mut tags = ParsedTags::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "title" => tags.title = Some(value),
                "artist" => tags.artist = Some(value),
                "album" => tags.album = Some(value),
                "duration" => tags.duration_ms = value.parse().unwrap_or(0),
                "codec" => tags.codec = Some(value),
                "format" => tags.format = Some(value),
                "bitrate" => tags.bitrate = value.parse().ok(),
                "sample_rate" => tags.sample_rate = value.parse().ok(),
                "track" => tags.track_number = value.parse().ok(),
                "year" => tags.year = value.parse().ok(),
                "genre" => tags.genre = Some(value),
                "picture" => {
                    tags.picture = Some(EmbeddedPicture {
                        mime_type: value,
                        data: b"img".to_vec(),
                    })
                }
                _ => {}
            }
        }
        Ok(tags)
    }
}

/// Contents of a well-formed fake audio file.
pub fn fake_audio(title: &str) -> Vec<u8> {
    format!("title={title}\nartist=Queen\nalbum=Innuendo\nduration=240000\ncodec=mp3\nbitrate=320")
        .into_bytes()
}

/// Creates a mock [`Track`] with sensible defaults.
///
/// Customize using struct update syntax:
///
/// ```ignore
/// let track = Track {
///     name: "Custom Title".to_string(),
///     ..mock_track("/music/a.mp3", 1_000)
/// };
/// ```
pub fn mock_track(path: &str, modified: i64) -> Track {
    let path = PathBuf::from(path);
    Track {
        id: TrackId::from_path(&path),
        name: "Test Track".to_string(),
        artist: "Test Artist".to_string(),
        album: "Test Album".to_string(),
        duration_ms: 180_000,
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path,
        size: 4_096,
        format: "mp3".to_string(),
        codec: Some("mp3".to_string()),
        bitrate: Some(320),
        sample_rate: Some(44_100),
        track_number: Some(1),
        year: Some(1991),
        genre: Some("Rock".to_string()),
        album_artist: None,
        composer: None,
        comment: None,
        lyrics: None,
        artwork: None,
        date_added: 1_000,
        date_modified: modified,
        play_count: 0,
        last_played: None,
        source: TrackSource::Local,
    }
}

// ============================================================================
// Events
// ============================================================================

/// Records every published event.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<CatalogEvent>>>,
    _subscription: Subscription,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = bus.subscribe(move |event| sink.lock().push(event.clone()));
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<CatalogEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(CatalogEvent::name).collect()
    }
}

// ============================================================================
// Settings
// ============================================================================

/// In-memory [`SettingsStore`] with a save counter and a failure switch.
#[derive(Default)]
pub struct MemorySettingsStore {
    saved: Mutex<Option<ScanSettings>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySettingsStore {
    /// Store that already holds `settings`.
    pub fn with(settings: ScanSettings) -> Self {
        Self {
            saved: Mutex::new(Some(settings)),
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Option<ScanSettings> {
        self.saved.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> std::result::Result<Option<ScanSettings>, ConfigError> {
        Ok(self.saved())
    }

    async fn save(&self, settings: &ScanSettings) -> std::result::Result<(), ConfigError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ConfigError::Unavailable("disk full".to_string()));
        }
        *self.saved.lock() = Some(settings.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Watch manager backed by the given bridge and catalog.
pub fn watch_manager_with(
    fs: Arc<dyn FileSystem>,
    catalog: Arc<dyn CatalogRepository>,
    events: &EventBus,
) -> Arc<WatchManager> {
    let extractor = Arc::new(MetadataExtractor::new(
        Arc::clone(&fs),
        Arc::clone(&catalog),
        Arc::new(FakeTagReader),
    ));
    Arc::new(WatchManager::new(fs, catalog, extractor, events.clone()))
}

/// Watch manager over empty in-memory collaborators.
pub fn test_watch_manager(events: &EventBus) -> Arc<WatchManager> {
    watch_manager_with(
        Arc::new(MemoryFileSystem::new()),
        Arc::new(MemoryCatalog::new()),
        events,
    )
}

/// A [`Library`] over in-memory collaborators, with handles to each.
pub struct TestLibrary {
    pub library: Library,
    pub fs: Arc<MemoryFileSystem>,
    pub catalog: Arc<MemoryCatalog>,
    pub store: Arc<MemorySettingsStore>,
    pub events: EventBus,
    pub recorder: EventRecorder,
}

pub async fn test_library(settings: ScanSettings) -> TestLibrary {
    let fs = Arc::new(MemoryFileSystem::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let store = Arc::new(MemorySettingsStore::with(settings));
    let events = EventBus::new();
    let recorder = EventRecorder::attach(&events);

    let library = Library::open(
        fs.clone(),
        catalog.clone(),
        Arc::new(FakeTagReader),
        store.clone(),
        events.clone(),
    )
    .await
    .expect("Failed to open test library");

    TestLibrary {
        library,
        fs,
        catalog,
        store,
        events,
        recorder,
    }
}
