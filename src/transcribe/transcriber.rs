//! Per-channel streaming transcription.
//!
//! One transcriber per channel. The mixer's pre-interleave tap feeds a
//! bounded queue of 48kHz mono blocks; a feeder task converts them to the
//! engine's preferred rate and pushes them in, while a consumer task drains
//! the engine's result stream into the accumulated finals. Finals are
//! periodically flushed to a per-channel fragment file with an atomic
//! write-temp-and-rename.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::engine::{EngineResult, RecognizerEngine};
use super::segment::{format_timestamp, Speaker, TranscriptSegment};
use crate::audio::resample::StreamConverter;
use crate::error::Result;

/// Callback fired for every accepted segment, volatile and final alike.
pub type SegmentObserver = Box<dyn Fn(&TranscriptSegment) + Send + Sync>;

struct TranscriberState {
    speaker: Speaker,
    final_segments: Mutex<Vec<TranscriptSegment>>,
    latest_volatile: Mutex<Option<TranscriptSegment>>,
    fragment_path: Option<PathBuf>,
    flush_interval: Duration,
    last_flush: Mutex<Instant>,
    observer: Option<SegmentObserver>,
    cancelled: AtomicBool,
}

impl TranscriberState {
    fn handle_result(&self, result: EngineResult) {
        let text = result.text.trim();
        if text.is_empty() {
            return;
        }

        let (start_ms, end_ms) = result.time_range_ms();
        let segment = TranscriptSegment {
            start_ms,
            end_ms,
            speaker: self.speaker,
            text: text.to_string(),
            is_final: result.is_final,
        };

        if segment.is_final {
            {
                let mut finals = self.final_segments.lock().unwrap();
                finals.push(segment.clone());
            }
            // The final supersedes whatever volatile text was pending.
            *self.latest_volatile.lock().unwrap() = None;
            self.maybe_flush();
        } else {
            *self.latest_volatile.lock().unwrap() = Some(segment.clone());
        }

        if let Some(observer) = &self.observer {
            observer(&segment);
        }
    }

    fn maybe_flush(&self) {
        if self.fragment_path.is_none() {
            return;
        }

        let due = {
            let last = self.last_flush.lock().unwrap();
            last.elapsed() >= self.flush_interval
        };
        if !due {
            return;
        }

        self.flush_fragment();
    }

    /// Write the accumulated finals to the per-channel fragment.
    ///
    /// Snapshot under the lock, do I/O outside it; write a sibling temp file
    /// and rename it over the target so a concurrent reader never observes a
    /// partial fragment.
    fn flush_fragment(&self) {
        let Some(path) = &self.fragment_path else {
            return;
        };

        let snapshot = self.final_segments.lock().unwrap().clone();
        *self.last_flush.lock().unwrap() = Instant::now();

        let mut body = String::new();
        for segment in &snapshot {
            body.push_str(&format!(
                "[{}] {}\n",
                format_timestamp(segment.start_ms),
                segment.text
            ));
        }

        let tmp = path.with_extension("tmp");
        let written = std::fs::write(&tmp, &body).and_then(|_| std::fs::rename(&tmp, path));
        if let Err(e) = written {
            warn!(
                "atomic fragment flush to {} failed ({}); falling back to direct write",
                path.display(),
                e
            );
            if let Err(e) = std::fs::write(path, &body) {
                error!("fragment write to {} failed: {}", path.display(), e);
            }
        }
    }

    fn snapshot_finals(&self) -> Vec<TranscriptSegment> {
        self.final_segments.lock().unwrap().clone()
    }
}

pub struct StreamingTranscriber {
    engine: Arc<dyn RecognizerEngine>,
    state: Arc<TranscriberState>,
    feeder: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
}

impl StreamingTranscriber {
    /// Bring up the engine for one channel and start its worker tasks.
    ///
    /// `tap_rx` is the bounded queue of pre-interleave 48kHz mono blocks the
    /// mixer writes into. Model and locale failures surface here.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        engine: Arc<dyn RecognizerEngine>,
        speaker: Speaker,
        locale: &str,
        source_sample_rate: u32,
        tap_rx: mpsc::Receiver<Vec<f32>>,
        fragment_path: Option<PathBuf>,
        flush_interval: Duration,
        observer: Option<SegmentObserver>,
    ) -> Result<Self> {
        let results = engine.start(locale).await?;

        let engine_rate = engine.preferred_sample_rate();
        let converter = StreamConverter::new(source_sample_rate, engine_rate)?;

        info!(
            "transcriber started: speaker={}, locale={}, engine rate {}Hz",
            speaker, locale, engine_rate
        );

        let state = Arc::new(TranscriberState {
            speaker,
            final_segments: Mutex::new(Vec::new()),
            latest_volatile: Mutex::new(None),
            fragment_path,
            flush_interval,
            last_flush: Mutex::new(Instant::now()),
            observer,
            cancelled: AtomicBool::new(false),
        });

        let feeder = tokio::spawn(Self::feed_loop(engine.clone(), converter, tap_rx));
        let consumer = tokio::spawn(Self::consume_loop(state.clone(), results));

        Ok(Self {
            engine,
            state,
            feeder: Some(feeder),
            consumer: Some(consumer),
        })
    }

    async fn feed_loop(
        engine: Arc<dyn RecognizerEngine>,
        mut converter: StreamConverter,
        mut tap_rx: mpsc::Receiver<Vec<f32>>,
    ) {
        let mut converted = Vec::new();

        while let Some(block) = tap_rx.recv().await {
            converted.clear();
            if let Err(e) = converter.push(&block, &mut converted) {
                warn!("transcriber feed conversion failed: {}", e);
                break;
            }
            if !converted.is_empty() {
                engine.push_audio(&converted);
            }
        }

        // Tap closed: hand the converter remainder to the engine.
        converted.clear();
        if converter.finish(&mut converted).is_ok() && !converted.is_empty() {
            engine.push_audio(&converted);
        }
    }

    async fn consume_loop(
        state: Arc<TranscriberState>,
        mut results: mpsc::Receiver<EngineResult>,
    ) {
        while let Some(result) = results.recv().await {
            state.handle_result(result);
        }
        // Engine closed its stream: either finalize completed or the engine
        // crashed mid-session. Accumulated finals stay valid either way.
    }

    /// Ask the engine to drain and collect the accumulated finals.
    ///
    /// Waits up to `timeout` for the result stream to end; whatever finals
    /// exist at the deadline are returned and in-flight volatile text is
    /// discarded.
    pub async fn finalize(&mut self, timeout: Duration) -> Vec<TranscriptSegment> {
        if self.state.cancelled.load(Ordering::SeqCst) {
            return Vec::new();
        }

        self.engine.finalize().await;

        if let Some(mut consumer) = self.consumer.take() {
            if tokio::time::timeout(timeout, &mut consumer).await.is_err() {
                warn!(
                    "transcriber {} finalize timed out after {:?}",
                    self.state.speaker, timeout
                );
                consumer.abort();
            }
        }

        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }

        if self.state.fragment_path.is_some() {
            self.state.flush_fragment();
        }

        let finals = self.state.snapshot_finals();
        info!(
            "transcriber {} finalized with {} segments",
            self.state.speaker,
            finals.len()
        );
        finals
    }

    /// Abort the engine and workers immediately, discarding all results.
    pub fn cancel(&mut self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.engine.abort();

        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
        }
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }

        self.state.final_segments.lock().unwrap().clear();
        *self.state.latest_volatile.lock().unwrap() = None;
    }

    /// Snapshot of the finals accumulated so far.
    pub fn final_segments(&self) -> Vec<TranscriptSegment> {
        self.state.snapshot_finals()
    }

    /// The most recent volatile segment, if one is pending.
    pub fn latest_volatile(&self) -> Option<TranscriptSegment> {
        self.state.latest_volatile.lock().unwrap().clone()
    }

    pub fn speaker(&self) -> Speaker {
        self.state.speaker
    }
}
