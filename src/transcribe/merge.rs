//! Transcript merging.
//!
//! Takes the finals from both channels and renders the diarized markdown
//! artifact. A speaker header is emitted at the start, on every speaker
//! change, and whenever a same-speaker gap reaches the configured threshold.

use super::segment::{format_timestamp, TranscriptSegment};

/// Merge finals from both channels into the transcript markdown.
///
/// Segments are ordered by start time, with the speaker label breaking ties.
pub fn merge_transcript(
    mut segments: Vec<TranscriptSegment>,
    participants: Option<&[String]>,
    speaker_gap_ms: u64,
) -> String {
    segments.sort_by_key(|s| (s.start_ms, s.speaker));

    let mut out = String::from("# Transcript\n\n");

    if let Some(participants) = participants {
        if !participants.is_empty() {
            out.push_str(&format!("**Participants:** {}\n\n", participants.join(", ")));
        }
    }

    let mut current_speaker: Option<_> = None;
    let mut previous_end_ms: Option<u64> = None;

    for segment in &segments {
        let gap_ms = previous_end_ms
            .map(|end| segment.start_ms.saturating_sub(end))
            .unwrap_or(0);

        let new_block = current_speaker != Some(segment.speaker) || gap_ms >= speaker_gap_ms;
        if new_block {
            if current_speaker.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("**{}:**\n", segment.speaker));
            current_speaker = Some(segment.speaker);
        }

        out.push_str(&format!(
            "[{}] {}\n",
            format_timestamp(segment.start_ms),
            segment.text
        ));
        previous_end_ms = Some(segment.end_ms);
    }

    out
}
