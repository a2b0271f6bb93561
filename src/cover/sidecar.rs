//! Detect sidecar cover art files in the same directory as audio files.
//!
//! Common sidecar filenames:
//! - cover.jpg, cover.png
//! - folder.jpg, folder.png
//! - album.jpg, album.png
//! - front.jpg, front.png
//! - artwork.jpg, artwork.png

use std::path::{Path, PathBuf};

use crate::fs::FileSystem;

/// Common cover art filenames, in order of preference (lowercase for matching)
pub const COVER_FILENAMES: &[&str] = &[
    "cover",
    "folder",
    "album",
    "front",
    "artwork",
    "albumart",
    "albumartsmall",
];

/// Supported image extensions
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Find a sidecar cover art file in the same directory as the audio file.
///
/// Matching is case-insensitive. Returns None if no cover art is found or
/// the directory cannot be listed.
pub async fn find_sidecar_cover(fs: &dyn FileSystem, audio_path: &Path) -> Option<PathBuf> {
    let parent = audio_path.parent()?;
    let entries = match fs.list_dir(parent).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(target: "metadata", dir = %parent.display(), error = %e, "Cannot list directory for cover art");
            return None;
        }
    };

    entries
        .into_iter()
        .filter_map(|path| cover_rank(&path).map(|rank| (rank, path)))
        .min_by(|(a, pa), (b, pb)| a.cmp(b).then_with(|| pa.cmp(pb)))
        .map(|(_, path)| path)
}

/// Whether `path` looks like a cover image.
pub fn is_cover_file(path: &Path) -> bool {
    cover_rank(path).is_some()
}

/// Preference of a cover file: lower is better.
fn cover_rank(path: &Path) -> Option<(usize, usize)> {
    let stem = path.file_stem()?.to_str()?.to_lowercase();
    let ext = path.extension()?.to_str()?.to_lowercase();
    let name_rank = COVER_FILENAMES.iter().position(|n| *n == stem)?;
    let ext_rank = IMAGE_EXTENSIONS.iter().position(|e| *e == ext)?;
    Some((name_rank, ext_rank))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::test_utils::MemoryFileSystem;
    use tempfile::tempdir;

    #[test]
    fn test_is_cover_file() {
        assert!(is_cover_file(Path::new("/music/cover.jpg")));
        assert!(is_cover_file(Path::new("/music/Folder.PNG")));
        assert!(!is_cover_file(Path::new("/music/booklet.jpg")));
        assert!(!is_cover_file(Path::new("/music/cover.txt")));
    }

    #[tokio::test]
    async fn test_prefers_cover_over_folder() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/music/Queen/Folder.jpg", b"f".to_vec(), 1);
        fs.add_file("/music/Queen/COVER.png", b"c".to_vec(), 1);
        fs.add_file("/music/Queen/a.mp3", b"x".to_vec(), 1);

        let found = find_sidecar_cover(&fs, Path::new("/music/Queen/a.mp3")).await;
        assert_eq!(found, Some(PathBuf::from("/music/Queen/COVER.png")));
    }

    #[tokio::test]
    async fn test_no_cover_found() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("song.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let found = find_sidecar_cover(&LocalFileSystem, &dir.path().join("song.mp3")).await;
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_finds_cover_on_disk() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("song.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("folder.jpg"), b"jpg").unwrap();

        let found = find_sidecar_cover(&LocalFileSystem, &dir.path().join("song.mp3")).await;
        assert_eq!(found, Some(dir.path().join("folder.jpg")));
    }
}
