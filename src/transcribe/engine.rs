//! The opaque speech-recognition collaborator.
//!
//! The pipeline treats the recognizer as an external engine: it declares the
//! audio format it wants, accepts pushed frames, and yields a stream of
//! volatile and final results over a channel. Production builds wire in a
//! platform engine; tests use a scripted mock.

use tokio::sync::mpsc;

use crate::error::Result;

/// One timed run of recognized text inside a result.
#[derive(Debug, Clone)]
pub struct ResultRun {
    /// Start of the run, milliseconds from session start.
    pub start_ms: u64,
    pub duration_ms: u64,
    pub text_fragment: String,
}

/// One recognition result. A final supersedes every volatile result covering
/// the same time range.
#[derive(Debug, Clone)]
pub struct EngineResult {
    pub text: String,
    pub runs: Vec<ResultRun>,
    pub is_final: bool,
}

/// A streaming speech-recognition engine.
///
/// Contract:
/// - `start` may suspend (model availability checks, downloads) and surfaces
///   `ModelUnavailable` / `LocaleUnsupported`. On success the engine emits
///   results on the returned channel until it finishes or is aborted.
/// - `push_audio` must be cheap and non-blocking; it is called from the
///   transcriber's feeder task with frames at `preferred_sample_rate`.
/// - `finalize` asks the engine to emit any remaining finals and close the
///   result channel.
/// - `abort` tears the engine down immediately; the result channel closes
///   without further results.
#[async_trait::async_trait]
pub trait RecognizerEngine: Send + Sync {
    /// Sample rate (mono f32) the engine wants pushed.
    fn preferred_sample_rate(&self) -> u32;

    async fn start(&self, locale: &str) -> Result<mpsc::Receiver<EngineResult>>;

    fn push_audio(&self, samples: &[f32]);

    async fn finalize(&self);

    fn abort(&self);
}

impl EngineResult {
    /// Overall time range derived from the runs: earliest run start to the
    /// latest run end. Results without timing collapse to zero.
    pub fn time_range_ms(&self) -> (u64, u64) {
        let mut start = u64::MAX;
        let mut end = 0u64;
        for run in &self.runs {
            start = start.min(run.start_ms);
            end = end.max(run.start_ms + run.duration_ms);
        }
        if start == u64::MAX {
            (0, 0)
        } else {
            (start, end.max(start))
        }
    }
}
