//! Streaming transcription: per-channel recognizers, segment accumulation,
//! and the transcript merger.

pub mod engine;
pub mod merge;
pub mod segment;
pub mod transcriber;

pub use engine::{EngineResult, RecognizerEngine, ResultRun};
pub use merge::merge_transcript;
pub use segment::{format_timestamp, Speaker, TranscriptSegment};
pub use transcriber::{SegmentObserver, StreamingTranscriber};
