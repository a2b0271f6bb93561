//! From file path to catalog [`Track`].

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ParsedTags, TagReader, extension_of, title_from_file_name};
use crate::cover;
use crate::db::CatalogRepository;
use crate::error::{Error, Result};
use crate::fs::{FileStat, FileSystem};
use crate::model::{Artwork, Track, TrackId, TrackSource, UNKNOWN_ALBUM, UNKNOWN_ARTIST};
use crate::scanner::change::{self, ChangeDecision};

/// Result of [`MetadataExtractor::extract`].
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The stored record is current and was returned unchanged
    Cached(Track),
    /// The file was parsed; the track still has to be written
    Parsed(Track),
}

impl Extraction {
    pub fn track(&self) -> &Track {
        match self {
            Self::Cached(track) | Self::Parsed(track) => track,
        }
    }

    pub fn into_track(self) -> Track {
        match self {
            Self::Cached(track) | Self::Parsed(track) => track,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Turns one file path into a normalized [`Track`].
///
/// Nothing is written here; callers upsert [`Extraction::Parsed`] results.
pub struct MetadataExtractor {
    fs: Arc<dyn FileSystem>,
    catalog: Arc<dyn CatalogRepository>,
    reader: Arc<dyn TagReader>,
}

impl MetadataExtractor {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        catalog: Arc<dyn CatalogRepository>,
        reader: Arc<dyn TagReader>,
    ) -> Self {
        Self { fs, catalog, reader }
    }

    /// Stat, consult the catalog, and parse only if the file changed.
    ///
    /// Stat, read and parse failures concern this file only. A catalog
    /// failure is returned as is so the caller can tell the two apart.
    pub async fn extract(&self, path: &Path, force: bool) -> Result<Extraction> {
        let stat = self.fs.stat(path).await?;
        let existing = self.catalog.find_by_path(path).await?;

        let reason = match change::detect(existing.as_ref(), stat.modified, force) {
            ChangeDecision::Skip(_) => None,
            ChangeDecision::Process(reason) => Some(reason),
        };
        let Some(reason) = reason else {
            tracing::trace!(target: "metadata", path = %path.display(), "Unchanged, using cached record");
            // detect() only skips when a record exists
            return existing
                .map(Extraction::Cached)
                .ok_or_else(|| Error::not_found(path));
        };
        tracing::debug!(target: "metadata", path = %path.display(), reason = ?reason, "Parsing file");

        let bytes = self.fs.read_bytes(path).await?;
        let reader = Arc::clone(&self.reader);
        let parse_path = path.to_path_buf();
        // Tag parsing is CPU-bound; keep it off the async workers
        let tags = tokio::task::spawn_blocking(move || reader.read_tags(&parse_path, &bytes))
            .await
            .map_err(|e| Error::metadata(path, format!("Parser task failed: {e}")))??;

        let sidecar = if tags.picture.is_none() {
            cover::find_sidecar_cover(self.fs.as_ref(), path).await
        } else {
            None
        };

        Ok(Extraction::Parsed(build_track(
            path,
            stat,
            tags,
            sidecar,
            existing.as_ref(),
        )))
    }
}

fn build_track(
    path: &Path,
    stat: FileStat,
    tags: ParsedTags,
    sidecar: Option<PathBuf>,
    existing: Option<&Track>,
) -> Track {
    let artwork = match (tags.picture, sidecar) {
        (Some(picture), _) => Some(Artwork::Embedded {
            mime_type: picture.mime_type,
            data: picture.data,
        }),
        (None, Some(path)) => Some(Artwork::Sidecar { path }),
        (None, None) => None,
    };

    Track {
        id: TrackId::from_path(path),
        name: tags.title.unwrap_or_else(|| title_from_file_name(path)),
        artist: tags.artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
        album: tags.album.unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
        duration_ms: tags.duration_ms,
        path: path.to_path_buf(),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size: stat.size,
        format: tags.format.unwrap_or_else(|| extension_of(path)),
        codec: tags.codec,
        bitrate: tags.bitrate,
        sample_rate: tags.sample_rate,
        track_number: tags.track_number,
        year: tags.year,
        genre: tags.genre,
        album_artist: tags.album_artist,
        composer: tags.composer,
        comment: tags.comment,
        lyrics: tags.lyrics,
        artwork,
        date_added: existing
            .map(|t| t.date_added)
            .unwrap_or_else(|| Utc::now().timestamp_millis()),
        date_modified: stat.modified,
        play_count: existing.map(|t| t.play_count).unwrap_or(0),
        last_played: existing.and_then(|t| t.last_played),
        source: TrackSource::Local,
    }
}
