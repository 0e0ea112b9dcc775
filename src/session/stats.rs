use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::audio::MixerSummary;
use crate::encode::EncoderSummary;

/// Live statistics about a recording session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Whether recording is currently active.
    pub is_recording: bool,

    /// When the session object was created.
    pub started_at: DateTime<Utc>,

    /// Seconds since creation.
    pub duration_secs: f64,

    /// Final transcript segments accumulated on the microphone channel.
    pub mic_segments: usize,

    /// Final transcript segments accumulated on the system channel.
    pub system_segments: usize,
}

/// Everything `stop` produces: the merged transcript plus the artifact
/// paths and the degradation counters collected on the way down.
#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    /// The diarized transcript markdown.
    pub transcript_markdown: String,

    /// Where the audio artifact was written.
    pub audio_path: PathBuf,

    /// Where the merged transcript was written, if a path was supplied.
    pub transcript_path: Option<PathBuf>,

    pub mic_segments: usize,
    pub system_segments: usize,

    pub mixer: MixerSummary,
    pub encoder: EncoderSummary,
}
