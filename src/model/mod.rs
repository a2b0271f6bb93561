//! Core data models for the catalog.
//!
//! Defines [`Track`], its path-derived [`TrackId`], and the progress and
//! summary records produced by scans.
//!
//! # Identity
//!
//! A track's id is the lowercase hex SHA-256 of its absolute path (UTF-8,
//! lossy for non-UTF-8 paths), prefixed with `local:`. It is stable across
//! rescans and changes only when the file moves. The path is always stored
//! next to the id; nothing decodes an id back into a path.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Artist name used when a file carries no artist tag.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
/// Album name used when a file carries no album tag.
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Deterministic identifier of a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Prefix marking ids of locally stored files.
    pub const PREFIX: &'static str = "local:";

    /// Derive the id for an absolute file path.
    pub fn from_path(path: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        Self(format!("{}{:x}", Self::PREFIX, hasher.finalize()))
    }

    /// Wrap an id read back from storage.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a catalog entry came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    #[default]
    Local,
}

impl TrackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
        }
    }
}

/// Cover art attached to a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Artwork {
    /// Picture embedded in the file's tags, stored inline
    Embedded { mime_type: String, data: Vec<u8> },
    /// Image file next to the track (cover.jpg, folder.png, ...)
    Sidecar { path: PathBuf },
}

/// A catalog entry for one audio file.
///
/// Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    /// Title from tags, or derived from the file name
    pub name: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: u64,
    /// Absolute file path
    pub path: PathBuf,
    pub file_name: String,
    /// File size in bytes
    pub size: u64,
    /// Container format (mp3, flac, mp4, ogg, ...)
    pub format: String,
    /// Codec name; `None` for records written before codec detection
    pub codec: Option<String>,
    /// Bitrate in kbps
    pub bitrate: Option<u32>,
    /// Sample rate in Hz
    pub sample_rate: Option<u32>,
    pub track_number: Option<u32>,
    pub year: Option<u32>,
    pub genre: Option<String>,
    pub album_artist: Option<String>,
    pub composer: Option<String>,
    pub comment: Option<String>,
    pub lyrics: Option<String>,
    pub artwork: Option<Artwork>,
    /// When the file first entered the catalog; never moves once set
    pub date_added: i64,
    /// On-disk modification time at the last parse
    pub date_modified: i64,
    pub play_count: u32,
    pub last_played: Option<i64>,
    pub source: TrackSource,
}

/// Live progress of the running (or most recent) scan.
///
/// Counters are reset to zero when the next scan starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub is_scanning: bool,
    pub total_files: usize,
    pub scanned_files: usize,
    pub current_file: Option<PathBuf>,
    /// Per-file errors, formatted as `"<path>: <message>"`
    pub errors: Vec<String>,
}

impl ScanProgress {
    /// Percentage of files processed, clamped to 0..=100.
    pub fn percent(&self) -> u8 {
        percent(self.scanned_files, self.total_files)
    }
}

/// Totals reported when a scan completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub total_files: usize,
    pub scanned_files: usize,
    /// Files parsed and upserted
    pub parsed: usize,
    /// Files skipped by the change detector
    pub cached: usize,
    /// Files that failed to stat, read or parse
    pub failed: usize,
    /// Stale records pruned because their file is gone
    pub removed: usize,
    /// Per-file errors
    pub errors: Vec<String>,
    /// Roots that could not be enumerated
    pub directory_errors: Vec<String>,
}

impl ScanSummary {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || !self.directory_errors.is_empty()
    }
}

/// Integer percentage of `done` over `total`; an empty scan is complete.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.saturating_mul(100) / total).min(100) as u8
}
