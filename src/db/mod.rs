//! Catalog persistence.
//!
//! [`CatalogRepository`] is the storage seam the scanner and watcher write
//! through. [`SqliteCatalog`] implements it with SQLx and an embedded SQLite
//! database; the schema lives in `migrations/`.
//!
//! # Example
//!
//! ```ignore
//! use music_catalog::db::{SqliteCatalog, db_url};
//!
//! let catalog = SqliteCatalog::open(&db_url(None)).await?;
//! let tracks = catalog.all_tracks().await?;
//! ```

use async_trait::async_trait;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use crate::error::{Result, ResultExt};
use crate::model::{Artwork, Track, TrackId, TrackSource};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "music_catalog.db";

/// Storage for catalog records, keyed by absolute path.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_by_path(&self, path: &Path) -> Result<Option<Track>>;

    /// Insert or replace the record for `track.path`.
    ///
    /// An existing record keeps its `date_added`.
    async fn upsert(&self, track: &Track) -> Result<()>;

    /// Returns whether a record was removed.
    async fn remove_by_path(&self, path: &Path) -> Result<bool>;

    /// Remove every record at or below `dir`; returns how many.
    async fn remove_by_directory(&self, dir: &Path) -> Result<u64>;

    /// Paths of every record at or below `dir`.
    async fn paths_under(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Every record, ordered by artist, album, track number and path.
    async fn all_tracks(&self) -> Result<Vec<Track>>;
}

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, establishes a connection
/// pool with up to 5 connections, and runs all pending migrations.
pub async fn init_db(db_url: &str) -> std::result::Result<SqlitePool, sqlx::Error> {
    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::debug!(target: "db", url = db_url, "Database ready");
    Ok(pool)
}

/// [`CatalogRepository`] backed by SQLite.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `db_url`.
    pub async fn open(db_url: &str) -> Result<Self> {
        let pool = init_db(db_url)
            .await
            .with_context(format!("opening catalog {db_url}"))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SELECT_TRACK: &str = r#"
    SELECT path, id, name, artist, album, duration_ms, file_name, size, format,
           codec, bitrate, sample_rate, track_number, year, genre, album_artist,
           composer, comment, lyrics, artwork_kind, artwork_mime, artwork_data,
           artwork_path, date_added, date_modified, play_count, last_played
    FROM tracks
"#;

#[async_trait]
impl CatalogRepository for SqliteCatalog {
    async fn find_by_path(&self, path: &Path) -> Result<Option<Track>> {
        let row = sqlx::query_as::<_, TrackRow>(&format!("{SELECT_TRACK} WHERE path = ?"))
            .bind(path_key(path))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Track::from))
    }

    async fn upsert(&self, track: &Track) -> Result<()> {
        let (artwork_kind, artwork_mime, artwork_data, artwork_path) = match &track.artwork {
            Some(Artwork::Embedded { mime_type, data }) => {
                (Some("embedded"), Some(mime_type.as_str()), Some(data.as_slice()), None)
            }
            Some(Artwork::Sidecar { path }) => (Some("sidecar"), None, None, Some(path_key(path))),
            None => (None, None, None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO tracks (
                path, id, name, artist, album, duration_ms, file_name, size, format,
                codec, bitrate, sample_rate, track_number, year, genre, album_artist,
                composer, comment, lyrics, artwork_kind, artwork_mime, artwork_data,
                artwork_path, date_added, date_modified, play_count, last_played, source
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                id = excluded.id,
                name = excluded.name,
                artist = excluded.artist,
                album = excluded.album,
                duration_ms = excluded.duration_ms,
                file_name = excluded.file_name,
                size = excluded.size,
                format = excluded.format,
                codec = excluded.codec,
                bitrate = excluded.bitrate,
                sample_rate = excluded.sample_rate,
                track_number = excluded.track_number,
                year = excluded.year,
                genre = excluded.genre,
                album_artist = excluded.album_artist,
                composer = excluded.composer,
                comment = excluded.comment,
                lyrics = excluded.lyrics,
                artwork_kind = excluded.artwork_kind,
                artwork_mime = excluded.artwork_mime,
                artwork_data = excluded.artwork_data,
                artwork_path = excluded.artwork_path,
                date_modified = excluded.date_modified,
                play_count = excluded.play_count,
                last_played = excluded.last_played,
                source = excluded.source
            "#,
        )
        .bind(path_key(&track.path))
        .bind(track.id.as_str())
        .bind(&track.name)
        .bind(&track.artist)
        .bind(&track.album)
        .bind(track.duration_ms as i64)
        .bind(&track.file_name)
        .bind(track.size as i64)
        .bind(&track.format)
        .bind(track.codec.as_deref())
        .bind(track.bitrate.map(i64::from))
        .bind(track.sample_rate.map(i64::from))
        .bind(track.track_number.map(i64::from))
        .bind(track.year.map(i64::from))
        .bind(track.genre.as_deref())
        .bind(track.album_artist.as_deref())
        .bind(track.composer.as_deref())
        .bind(track.comment.as_deref())
        .bind(track.lyrics.as_deref())
        .bind(artwork_kind)
        .bind(artwork_mime)
        .bind(artwork_data)
        .bind(artwork_path)
        .bind(track.date_added)
        .bind(track.date_modified)
        .bind(i64::from(track.play_count))
        .bind(track.last_played)
        .bind(track.source.as_str())
        .execute(&self.pool)
        .await?;

        tracing::trace!(target: "db", path = %track.path.display(), "Upserted track");
        Ok(())
    }

    async fn remove_by_path(&self, path: &Path) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tracks WHERE path = ?")
            .bind(path_key(path))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_by_directory(&self, dir: &Path) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tracks WHERE substr(path, 1, length(?1)) = ?1")
            .bind(dir_prefix(dir))
            .execute(&self.pool)
            .await?;
        tracing::debug!(target: "db", dir = %dir.display(), removed = result.rows_affected(), "Removed directory records");
        Ok(result.rows_affected())
    }

    async fn paths_under(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT path FROM tracks WHERE substr(path, 1, length(?1)) = ?1 ORDER BY path")
                .bind(dir_prefix(dir))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(p,)| PathBuf::from(p)).collect())
    }

    async fn all_tracks(&self) -> Result<Vec<Track>> {
        let rows = sqlx::query_as::<_, TrackRow>(&format!(
            "{SELECT_TRACK} ORDER BY artist, album, track_number, path"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Track::from).collect())
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `dir` with exactly one trailing separator, so `/music` never matches
/// `/music2/...`.
fn dir_prefix(dir: &Path) -> String {
    let mut prefix = path_key(dir);
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    prefix
}

/// Raw `tracks` row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct TrackRow {
    path: String,
    id: String,
    name: String,
    artist: String,
    album: String,
    duration_ms: i64,
    file_name: String,
    size: i64,
    format: String,
    codec: Option<String>,
    bitrate: Option<i64>,
    sample_rate: Option<i64>,
    track_number: Option<i64>,
    year: Option<i64>,
    genre: Option<String>,
    album_artist: Option<String>,
    composer: Option<String>,
    comment: Option<String>,
    lyrics: Option<String>,
    artwork_kind: Option<String>,
    artwork_mime: Option<String>,
    artwork_data: Option<Vec<u8>>,
    artwork_path: Option<String>,
    date_added: i64,
    date_modified: i64,
    play_count: i64,
    last_played: Option<i64>,
}

impl From<TrackRow> for Track {
    fn from(row: TrackRow) -> Self {
        let artwork = match row.artwork_kind.as_deref() {
            Some("embedded") => row.artwork_data.map(|data| Artwork::Embedded {
                mime_type: row.artwork_mime.unwrap_or_default(),
                data,
            }),
            Some("sidecar") => row.artwork_path.map(|p| Artwork::Sidecar { path: p.into() }),
            _ => None,
        };
        let small = |v: Option<i64>| v.and_then(|v| u32::try_from(v).ok());

        Track {
            id: TrackId::from_stored(row.id),
            name: row.name,
            artist: row.artist,
            album: row.album,
            duration_ms: u64::try_from(row.duration_ms).unwrap_or(0),
            path: PathBuf::from(row.path),
            file_name: row.file_name,
            size: u64::try_from(row.size).unwrap_or(0),
            format: row.format,
            codec: row.codec,
            bitrate: small(row.bitrate),
            sample_rate: small(row.sample_rate),
            track_number: small(row.track_number),
            year: small(row.year),
            genre: row.genre,
            album_artist: row.album_artist,
            composer: row.composer,
            comment: row.comment,
            lyrics: row.lyrics,
            artwork,
            date_added: row.date_added,
            date_modified: row.date_modified,
            play_count: u32::try_from(row.play_count).unwrap_or(0),
            last_played: row.last_played,
            // Only local files are cataloged
            source: TrackSource::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock_track;

    async fn open_temp() -> (tempfile::TempDir, SqliteCatalog) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let catalog = SqliteCatalog::open(&db_url(Some(&db_path))).await.unwrap();
        (temp_dir, catalog)
    }

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let catalog = SqliteCatalog::open(&db_url(Some(&db_path)))
            .await
            .expect("Failed to init db");
        assert!(db_path.exists());

        // Verify we can query the tables
        let tracks = catalog.all_tracks().await.expect("Failed to query tracks");
        assert!(tracks.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let (_dir, catalog) = open_temp().await;
        let mut track = mock_track("/music/Queen/a.mp3", 1_000);
        track.artwork = Some(Artwork::Embedded {
            mime_type: "image/png".to_string(),
            data: vec![0x89, 0x50, 0x4E, 0x47],
        });
        track.lyrics = Some("Is this the real life?".to_string());

        catalog.upsert(&track).await.unwrap();
        let found = catalog
            .find_by_path(Path::new("/music/Queen/a.mp3"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, track);

        assert!(catalog.find_by_path(Path::new("/music/none.mp3")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_keeps_date_added() {
        let (_dir, catalog) = open_temp().await;
        let mut track = mock_track("/music/a.mp3", 1_000);
        track.date_added = 100;
        catalog.upsert(&track).await.unwrap();

        track.name = "Renamed".to_string();
        track.date_added = 999;
        track.date_modified = 2_000;
        track.artwork = Some(Artwork::Sidecar {
            path: PathBuf::from("/music/cover.jpg"),
        });
        catalog.upsert(&track).await.unwrap();

        let found = catalog.find_by_path(&track.path).await.unwrap().unwrap();
        assert_eq!(found.name, "Renamed");
        assert_eq!(found.date_added, 100);
        assert_eq!(found.date_modified, 2_000);
        assert_eq!(found.artwork, track.artwork);
        assert_eq!(catalog.all_tracks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_by_path() {
        let (_dir, catalog) = open_temp().await;
        catalog.upsert(&mock_track("/music/a.mp3", 1)).await.unwrap();

        assert!(catalog.remove_by_path(Path::new("/music/a.mp3")).await.unwrap());
        assert!(!catalog.remove_by_path(Path::new("/music/a.mp3")).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_by_directory_respects_boundaries() {
        let (_dir, catalog) = open_temp().await;
        for path in [
            "/music/a.mp3",
            "/music/Queen/b.mp3",
            "/music2/c.mp3",
            "/other/d.mp3",
        ] {
            catalog.upsert(&mock_track(path, 1)).await.unwrap();
        }

        assert_eq!(
            catalog.paths_under(Path::new("/music")).await.unwrap(),
            vec![PathBuf::from("/music/Queen/b.mp3"), PathBuf::from("/music/a.mp3")]
        );
        assert_eq!(catalog.remove_by_directory(Path::new("/music/")).await.unwrap(), 2);

        let remaining: Vec<PathBuf> = catalog
            .all_tracks()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.path)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&PathBuf::from("/music2/c.mp3")));
    }

    #[test]
    fn test_db_url() {
        assert_eq!(db_url(None), "sqlite:music_catalog.db");
        assert_eq!(db_url(Some(Path::new("/tmp/x.db"))), "sqlite:/tmp/x.db");
    }
}
