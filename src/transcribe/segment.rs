use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::ChannelSource;

/// Speaker label attached to a transcript segment.
///
/// Diarization here is a deterministic channel tag, not an audio classifier:
/// the microphone channel is "Me", the system-audio channel is "Them".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Speaker {
    Me,
    Them,
}

impl Speaker {
    pub fn for_channel(source: ChannelSource) -> Self {
        match source {
            ChannelSource::Microphone => Speaker::Me,
            ChannelSource::System => Speaker::Them,
        }
    }

    /// Lowercase form used in per-channel fragment filenames.
    pub fn slug(&self) -> &'static str {
        match self {
            Speaker::Me => "me",
            Speaker::Them => "them",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Me => write!(f, "Me"),
            Speaker::Them => write!(f, "Them"),
        }
    }
}

/// A single recognized utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start of the utterance, milliseconds from session start.
    pub start_ms: u64,
    /// End of the utterance; always >= start_ms.
    pub end_ms: u64,
    pub speaker: Speaker,
    /// Trimmed, non-empty text.
    pub text: String,
    /// Final results are committed by the engine; volatile ones may be
    /// revised and are never persisted.
    pub is_final: bool,
}

/// `HH:MM:SS.mmm` rendering used by fragments and the merged transcript.
pub fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_channel_mapping() {
        assert_eq!(Speaker::for_channel(ChannelSource::Microphone), Speaker::Me);
        assert_eq!(Speaker::for_channel(ChannelSource::System), Speaker::Them);
    }

    #[test]
    fn test_speaker_display() {
        assert_eq!(Speaker::Me.to_string(), "Me");
        assert_eq!(Speaker::Them.to_string(), "Them");
        assert_eq!(Speaker::Me.slug(), "me");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "00:00:00.000");
        assert_eq!(format_timestamp(500), "00:00:00.500");
        assert_eq!(format_timestamp(61_001), "00:01:01.001");
        assert_eq!(format_timestamp(3_600_000 + 23 * 60_000 + 45_678), "01:23:45.678");
    }
}
