pub mod audio;
pub mod config;
pub mod encode;
pub mod error;
pub mod session;
pub mod transcribe;

pub use audio::{
    AudioFile, CaptureSource, ChannelSource, FileSource, LevelEvent, LimiterParams, MixerConfig,
    MixerCore, MixerSummary, SampleFrame, SamplePayload, SoftLimiter, StereoBlock, Timebase,
};
pub use config::RecorderConfig;
pub use encode::{EncoderSummary, FlacEncoder};
pub use error::SessionError;
pub use session::{RecordingSession, SessionOutcome, SessionStats};
pub use transcribe::{
    merge_transcript, EngineResult, RecognizerEngine, ResultRun, Speaker, StreamingTranscriber,
    TranscriptSegment,
};
