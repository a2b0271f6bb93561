//! Title fallback for files without a title tag.

use std::path::Path;

/// Derive a display title from a file name.
///
/// - `03 - Innuendo.flac` -> `Innuendo` (leading track number stripped)
/// - `Innuendo - Queen.mp3` -> `Innuendo` (segment before the last `" - "`)
/// - `Innuendo.mp3` -> `Innuendo`
pub fn title_from_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    title_from_stem(&stem)
}

pub(crate) fn title_from_stem(stem: &str) -> String {
    let stem = stem.trim();
    if let Some(rest) = strip_track_number(stem) {
        return rest.to_string();
    }
    if let Some((head, _)) = stem.rsplit_once(" - ") {
        let head = head.trim();
        if !head.is_empty() {
            return head.to_string();
        }
    }
    stem.to_string()
}

/// `"03 - Innuendo"`, `"03. Innuendo"`, `"3_Innuendo"` -> `"Innuendo"`.
///
/// One to three leading digits followed by at least one separator. Returns
/// `None` when nothing would be left.
fn strip_track_number(stem: &str) -> Option<&str> {
    let digits = stem.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || digits > 3 {
        return None;
    }
    let after_digits = &stem[digits..];
    let rest = after_digits.trim_start_matches(|c: char| matches!(c, ' ' | '-' | '.' | '_'));
    if rest.len() == after_digits.len() || rest.trim().is_empty() {
        return None;
    }
    Some(rest.trim())
}
