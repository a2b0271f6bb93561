//! Audio file metadata reading.
//!
//! Uses the lofty crate for format-independent tag access. The file type is
//! sniffed from the content and falls back to the extension, so MP3, FLAC,
//! OGG/Opus, M4A, WAV, AIFF, APE and WavPack files are all understood.
//!
//! Parsing sits behind [`TagReader`] so extraction logic can be tested
//! without real audio files; [`MetadataExtractor`] turns parsed tags into
//! catalog [`Track`](crate::model::Track)s.

mod extractor;
mod title;

pub use extractor::{Extraction, MetadataExtractor};
pub use title::title_from_file_name;

use lofty::file::{AudioFile, FileType, TaggedFileExt};
use lofty::picture::{Picture, PictureType};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};
use std::io::Cursor;
use std::path::Path;

use crate::error::{Error, Result};

/// Everything read from one file's tags and stream properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: u64,
    /// Container format (mp3, flac, mp4, ogg, ...)
    pub format: Option<String>,
    pub codec: Option<String>,
    /// Bitrate in kbps
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub track_number: Option<u32>,
    pub year: Option<u32>,
    pub genre: Option<String>,
    pub album_artist: Option<String>,
    pub composer: Option<String>,
    pub comment: Option<String>,
    pub lyrics: Option<String>,
    pub picture: Option<EmbeddedPicture>,
}

/// First embedded picture, front cover preferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedPicture {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Parses the bytes of one audio file.
///
/// Implementations are CPU-bound and called from the blocking pool.
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path, bytes: &[u8]) -> Result<ParsedTags>;
}

/// [`TagReader`] backed by lofty.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read_tags(&self, path: &Path, bytes: &[u8]) -> Result<ParsedTags> {
        if bytes.is_empty() {
            return Err(Error::metadata(path, "File is empty"));
        }

        // Probe by content first, the extension is only a hint
        let mut probe = Probe::new(Cursor::new(bytes))
            .guess_file_type()
            .map_err(|e| Error::metadata(path, e.to_string()))?;
        if probe.file_type().is_none()
            && let Some(file_type) = FileType::from_path(path)
        {
            probe = probe.set_file_type(file_type);
        }
        if probe.file_type().is_none() {
            return Err(Error::metadata(path, "Unrecognized audio format"));
        }

        let tagged_file = probe
            .read()
            .map_err(|e| Error::metadata(path, e.to_string()))?;

        let properties = tagged_file.properties();
        let file_type = tagged_file.file_type();

        let mut parsed = ParsedTags {
            duration_ms: properties.duration().as_millis() as u64,
            format: Some(container_name(file_type, path)),
            codec: codec_name(file_type).map(str::to_string),
            bitrate: properties.audio_bitrate().or(properties.overall_bitrate()),
            sample_rate: properties.sample_rate(),
            ..ParsedTags::default()
        };

        // Get the primary tag, or fall back to the first available tag
        if let Some(tag) = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
        {
            read_tag_fields(tag, &mut parsed);
        }

        Ok(parsed)
    }
}

fn read_tag_fields(tag: &Tag, parsed: &mut ParsedTags) {
    parsed.title = non_empty(tag.title().as_deref());
    parsed.artist = non_empty(tag.artist().as_deref());
    parsed.album = non_empty(tag.album().as_deref());
    parsed.genre = non_empty(tag.genre().as_deref());
    parsed.comment = non_empty(tag.comment().as_deref());
    parsed.track_number = tag.track();
    parsed.year = tag.year().or_else(|| {
        tag.get_string(&ItemKey::RecordingDate)
            .and_then(parse_year)
    });
    parsed.album_artist = non_empty(tag.get_string(&ItemKey::AlbumArtist));
    parsed.composer = non_empty(tag.get_string(&ItemKey::Composer));
    parsed.lyrics = non_empty(tag.get_string(&ItemKey::Lyrics));
    parsed.picture = pick_picture(tag.pictures()).map(|picture| EmbeddedPicture {
        mime_type: picture
            .mime_type()
            .map(|m| m.as_str().to_string())
            .or_else(|| guess_mime(picture.data()).map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        data: picture.data().to_vec(),
    });
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// First run of up to four digits, e.g. "1991-02-04" -> 1991.
fn parse_year(text: &str) -> Option<u32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    digits.parse().ok()
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())
}

fn guess_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png")
    } else {
        None
    }
}

/// Codec carried by a file type, if it implies one.
pub fn codec_name(file_type: FileType) -> Option<&'static str> {
    match file_type {
        FileType::Aac => Some("aac"),
        FileType::Aiff => Some("pcm"),
        FileType::Ape => Some("ape"),
        FileType::Flac => Some("flac"),
        FileType::Mpeg => Some("mp3"),
        FileType::Mp4 => Some("aac"),
        FileType::Mpc => Some("musepack"),
        FileType::Opus => Some("opus"),
        FileType::Speex => Some("speex"),
        FileType::Vorbis => Some("vorbis"),
        FileType::Wav => Some("pcm"),
        FileType::WavPack => Some("wavpack"),
        _ => None,
    }
}

fn container_name(file_type: FileType, path: &Path) -> String {
    let name = match file_type {
        FileType::Aac => "aac",
        FileType::Aiff => "aiff",
        FileType::Ape => "ape",
        FileType::Flac => "flac",
        FileType::Mpeg => "mp3",
        FileType::Mp4 => "mp4",
        FileType::Mpc => "mpc",
        FileType::Opus | FileType::Speex | FileType::Vorbis => "ogg",
        FileType::Wav => "wav",
        FileType::WavPack => "wavpack",
        _ => return extension_of(path),
    };
    name.to_string()
}

/// Lowercase extension of `path`, empty when there is none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Minimal 8 kHz mono 8-bit PCM WAV file of the given length.
    fn wav_bytes(seconds: u32) -> Vec<u8> {
        let sample_rate: u32 = 8_000;
        let channels: u16 = 1;
        let bits: u16 = 8;
        let block_align = channels * bits / 8;
        let byte_rate = sample_rate * u32::from(block_align);
        let data_len = byte_rate * seconds;

        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.resize(out.len() + data_len as usize, 128);
        out
    }

    #[test]
    fn test_read_non_audio_bytes_returns_error() {
        let result = LoftyTagReader.read_tags(
            &PathBuf::from("notes.txt"),
            b"This is just some text, not music.",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_file_is_corrupt() {
        let result = LoftyTagReader.read_tags(&PathBuf::from("/music/b.mp3"), b"");
        assert!(matches!(result, Err(Error::Metadata { .. })));
    }

    #[test]
    fn test_read_untagged_wav() {
        let tags = LoftyTagReader
            .read_tags(&PathBuf::from("/music/tone.wav"), &wav_bytes(1))
            .unwrap();

        assert!((990..=1010).contains(&tags.duration_ms), "duration {}", tags.duration_ms);
        assert_eq!(tags.codec.as_deref(), Some("pcm"));
        assert_eq!(tags.format.as_deref(), Some("wav"));
        assert_eq!(tags.sample_rate, Some(8_000));
        assert_eq!(tags.title, None);
        assert_eq!(tags.picture, None);
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("1991"), Some(1991));
        assert_eq!(parse_year("1991-02-04"), Some(1991));
        assert_eq!(parse_year("c. 1975"), Some(1975));
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn test_codec_names() {
        assert_eq!(codec_name(FileType::Mpeg), Some("mp3"));
        assert_eq!(codec_name(FileType::Flac), Some("flac"));
        assert_eq!(codec_name(FileType::Opus), Some("opus"));
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(guess_mime(&[0x89, 0x50, 0x4E, 0x47, 0x0D]), Some("image/png"));
        assert_eq!(guess_mime(b"GIF89a"), None);
    }

    #[test]
    fn test_non_empty_trims() {
        assert_eq!(non_empty(Some("  Queen ")), Some("Queen".to_string()));
        assert_eq!(non_empty(Some("   ")), None);
        assert_eq!(non_empty(None), None);
    }
}
