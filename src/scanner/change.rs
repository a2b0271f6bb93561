//! Change detection: decide whether a file needs re-parsing.
//!
//! A file is skipped when its stored [`Fingerprint`] (modification time plus
//! codec presence) still matches disk and no rescan is forced. Records written
//! before codec detection existed carry no codec and are healed on the next
//! pass.

use crate::model::Track;

/// The (modification time, codec presence) pair compared against disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub modified: i64,
    pub has_codec: bool,
}

impl Fingerprint {
    pub fn of(track: &Track) -> Self {
        Self {
            modified: track.date_modified,
            has_codec: track.codec.is_some(),
        }
    }
}

/// Why a file is being (re-)parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessReason {
    /// No record exists for the path
    New,
    /// The on-disk modification time differs from the record
    Modified,
    /// The record predates codec detection
    MissingCodec,
    /// The caller asked for a full rescan
    Forced,
}

/// Outcome of [`detect`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeDecision<'a> {
    /// The stored record is current
    Skip(&'a Track),
    Process(ProcessReason),
}

impl ChangeDecision<'_> {
    pub fn should_process(&self) -> bool {
        matches!(self, Self::Process(_))
    }
}

/// Compare an existing record with the current on-disk modification time.
pub fn detect(existing: Option<&Track>, current_modified: i64, force: bool) -> ChangeDecision<'_> {
    if force {
        return ChangeDecision::Process(ProcessReason::Forced);
    }
    let Some(track) = existing else {
        return ChangeDecision::Process(ProcessReason::New);
    };
    let fingerprint = Fingerprint::of(track);
    if fingerprint.modified != current_modified {
        ChangeDecision::Process(ProcessReason::Modified)
    } else if !fingerprint.has_codec {
        ChangeDecision::Process(ProcessReason::MissingCodec)
    } else {
        ChangeDecision::Skip(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock_track;

    #[test]
    fn new_file_is_processed() {
        assert_eq!(
            detect(None, 1_000, false),
            ChangeDecision::Process(ProcessReason::New)
        );
    }

    #[test]
    fn unchanged_file_with_codec_is_skipped() {
        let track = mock_track("/music/a.mp3", 1_000);
        let decision = detect(Some(&track), 1_000, false);
        assert!(!decision.should_process());
        assert!(matches!(decision, ChangeDecision::Skip(t) if t.path == track.path));
    }

    #[test]
    fn modified_file_is_processed() {
        let track = mock_track("/music/a.mp3", 1_000);
        assert_eq!(
            detect(Some(&track), 2_000, false),
            ChangeDecision::Process(ProcessReason::Modified)
        );
    }

    #[test]
    fn record_without_codec_is_healed() {
        let mut track = mock_track("/music/a.mp3", 1_000);
        track.codec = None;
        assert_eq!(
            detect(Some(&track), 1_000, false),
            ChangeDecision::Process(ProcessReason::MissingCodec)
        );
    }

    #[test]
    fn force_overrides_matching_fingerprint() {
        let track = mock_track("/music/a.mp3", 1_000);
        assert_eq!(
            detect(Some(&track), 1_000, true),
            ChangeDecision::Process(ProcessReason::Forced)
        );
    }
}
