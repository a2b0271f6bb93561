//! File discovery, change detection and filesystem watching.
//!
//! Discovery walks one root and yields candidate audio files lazily. A file
//! is a candidate when its extension is accepted (case-insensitive) and its
//! file name contains none of the exclude patterns (case-insensitive
//! substring, not a glob). Names starting with `.` (hidden files, macOS
//! `._` AppleDouble twins, hidden directories) are never candidates.
//!
//! A discovery stream yields [`Discovered`] items: a candidate file, or an
//! [`Error::Enumeration`] for an entry below the root that could not be read.
//! Records under an unreadable entry must not be treated as deleted.

pub mod change;
pub mod watcher;

pub use change::{ChangeDecision, Fingerprint, ProcessReason};
pub use watcher::{WatchError, WatchEvent, WatchManager, WatchOptions};

use futures::stream::{BoxStream, Stream};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::config::ScanSettings;
use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// One item of a discovery stream.
pub type Discovered = Result<PathBuf>;

/// Hidden names are skipped by discovery and by the watcher.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Which files under a root count as audio candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub recursive: bool,
    /// Lowercase extensions without the leading dot
    pub extensions: Vec<String>,
    /// Lowercase exclude substrings
    pub exclude: Vec<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from_settings(&ScanSettings::default())
    }
}

impl DiscoveryOptions {
    pub fn new(recursive: bool, extensions: &[String], exclude: &[String]) -> Self {
        Self {
            recursive,
            extensions: extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            exclude: exclude
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn from_settings(settings: &ScanSettings) -> Self {
        Self::new(
            settings.recursive,
            &settings.extensions,
            &settings.exclude_patterns,
        )
    }

    /// Whether `path` is an audio candidate.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        !is_hidden(name) && self.has_accepted_extension(path) && !self.is_excluded(name)
    }

    pub fn has_accepted_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let ext = e.to_lowercase();
                self.extensions.iter().any(|accepted| *accepted == ext)
            })
            .unwrap_or(false)
    }

    /// Whether a final path segment matches any exclude pattern.
    pub fn is_excluded(&self, name: &str) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        let name = name.to_lowercase();
        self.exclude.iter().any(|pattern| name.contains(pattern.as_str()))
    }
}

/// Enumerate candidate files under `root` through the bridge.
///
/// A rejected enumeration is returned to the caller; that root contributes
/// no files.
pub async fn discover(
    fs: &dyn FileSystem,
    root: &Path,
    options: &DiscoveryOptions,
) -> Result<BoxStream<'static, Discovered>> {
    match fs.enumerate(root, options).await {
        Ok(stream) => {
            tracing::debug!(target: "scanner::discovery", root = %root.display(), recursive = options.recursive, "Enumerating root");
            Ok(stream)
        }
        Err(e) => {
            tracing::warn!(target: "scanner::discovery", root = %root.display(), error = %e, "Cannot enumerate root");
            Err(e)
        }
    }
}

/// Walk `root` on the blocking pool and stream matching files.
///
/// Unreadable entries below the root (permission errors, dangling symlinks,
/// offline mounts) are yielded as [`Error::Enumeration`] and the walk goes
/// on. Hidden directories are not entered. Dropping the stream stops the
/// walk.
pub fn walk(root: PathBuf, options: DiscoveryOptions) -> impl Stream<Item = Discovered> {
    let (tx, rx) = mpsc::channel(100);

    // Spawn a blocking task to perform the synchronous file system traversal
    tokio::task::spawn_blocking(move || {
        let max_depth = if options.recursive { usize::MAX } else { 1 };
        let entries = WalkDir::new(&root)
            .follow_links(true)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_str().is_some_and(is_hidden));
        for entry in entries {
            let item = match entry {
                Ok(entry) if entry.file_type().is_file() && options.accepts(entry.path()) => {
                    Ok(entry.into_path())
                }
                Ok(_) => continue,
                Err(e) => {
                    let path = e.path().unwrap_or(&root).to_path_buf();
                    tracing::warn!(target: "scanner::discovery", path = %path.display(), error = %e, "Unreadable entry");
                    Err(Error::enumeration(path, e.to_string()))
                }
            };
            // If the receiver is dropped, blocking_send fails and we stop scanning
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });

    // Convert the mpsc Receiver into a Stream
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|path| (path, rx))
    })
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Exclude matching ignores case on both sides
        #[test]
        fn exclude_is_case_insensitive(pattern in "[a-zA-Z]{1,8}", prefix in "[a-z ]{0,8}", suffix in "[a-z ]{0,8}") {
            let options = DiscoveryOptions::new(true, &["mp3".to_string()], &[pattern.to_uppercase()]);
            let name = format!("{}{}{}.mp3", prefix, pattern.to_lowercase(), suffix);
            prop_assert!(options.is_excluded(&name));
        }

        /// Without exclude patterns, every accepted extension passes
        #[test]
        fn no_patterns_exclude_nothing(stem in "[a-zA-Z0-9 _-]{1,20}") {
            let options = DiscoveryOptions::new(true, &["flac".to_string()], &[]);
            let file_name = format!("{}.flac", stem);
            let path = Path::new("/music").join(file_name);
            prop_assert!(options.accepts(&path));
        }
    }
}
