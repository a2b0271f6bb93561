//! File-access bridge.
//!
//! Every filesystem touch made by discovery, extraction and the watcher goes
//! through [`FileSystem`], so the catalog logic can run against local disk or
//! an in-memory tree in tests. The bridge owns its own timeout policy; nothing
//! above it imposes one.
//!
//! The exception is event classification on the watcher's debouncer thread,
//! see [`crate::scanner::watcher::is_dir_on_disk`].

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result, ResultExt};
use crate::scanner::{self, Discovered, DiscoveryOptions};

/// Result of a file stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes
    pub size: u64,
    /// Modification time, Unix milliseconds
    pub modified: i64,
}

/// Asynchronous, fallible access to the files under the catalog's roots.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Lazily enumerate candidate audio files under `root`.
    ///
    /// Fails with [`Error::Enumeration`] when the root itself is inaccessible.
    /// Entries below the root that cannot be read are yielded as
    /// [`Error::Enumeration`] items.
    async fn enumerate(
        &self,
        root: &Path,
        options: &DiscoveryOptions,
    ) -> Result<BoxStream<'static, Discovered>>;

    /// Size and modification time of a file. Fails with [`Error::NotFound`].
    async fn stat(&self, path: &Path) -> Result<FileStat>;

    /// Read a whole file into memory.
    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>>;

    /// Direct children (files only) of a directory.
    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;
}

/// [`FileSystem`] backed by the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn enumerate(
        &self,
        root: &Path,
        options: &DiscoveryOptions,
    ) -> Result<BoxStream<'static, Discovered>> {
        // Opening the directory catches both missing roots and permission errors
        tokio::fs::read_dir(root)
            .await
            .map_err(|e| Error::enumeration(root, e.to_string()))?;
        Ok(scanner::walk(root.to_path_buf(), options.clone()).boxed())
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| io_error(path, e))?;
        if !metadata.is_file() {
            return Err(Error::not_found(path));
        }
        Ok(FileStat {
            size: metadata.len(),
            modified: unix_millis(
                metadata
                    .modified()
                    .with_context(format!("reading mtime of {}", path.display()))?,
            ),
        })
    }

    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| io_error(path, e))
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| io_error(dir, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

fn io_error(path: &Path, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::not_found(path)
    } else {
        Error::Io(err)
    }
}

/// Convert a system time to Unix milliseconds (negative before the epoch).
pub fn unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}
