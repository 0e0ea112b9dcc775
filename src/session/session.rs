use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::stats::{SessionOutcome, SessionStats};
use crate::audio::{
    CaptureSource, ChannelSource, LevelEvent, MixerConfig, MixerCore, MixerSummary, Timebase,
};
use crate::config::RecorderConfig;
use crate::encode::{EncoderSummary, FlacEncoder};
use crate::error::{Result, SessionError};
use crate::transcribe::{merge_transcript, RecognizerEngine, Speaker, StreamingTranscriber};

/// Capture-frame handoff queue depth per channel (~4s at 100ms frames).
const CAPTURE_QUEUE_FRAMES: usize = 40;

/// Lossy level-event queue depth.
const LEVEL_QUEUE_EVENTS: usize = 8;

/// A recording session: exclusive owner of the capture sources, the mixer,
/// the encoder sink, and both streaming transcribers.
///
/// A process should hold at most one session at a time; the session is
/// single-use (created to record, destroyed after `stop`).
pub struct RecordingSession {
    config: RecorderConfig,
    session_id: String,
    started_at: chrono::DateTime<Utc>,
    is_recording: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    pending: Option<PendingParts>,
    active: Option<ActiveRecording>,
    outcome: Option<SessionOutcome>,
    level_rx: Option<mpsc::Receiver<LevelEvent>>,
}

/// Components handed over at construction, consumed by `start`.
struct PendingParts {
    mic_source: Box<dyn CaptureSource>,
    system_source: Box<dyn CaptureSource>,
    mic_engine: Arc<dyn RecognizerEngine>,
    system_engine: Arc<dyn RecognizerEngine>,
}

struct ActiveRecording {
    mic_source: Box<dyn CaptureSource>,
    system_source: Box<dyn CaptureSource>,
    mixer_task: JoinHandle<Result<MixerSummary>>,
    encoder_task: JoinHandle<Result<EncoderSummary>>,
    mic_transcriber: StreamingTranscriber,
    system_transcriber: StreamingTranscriber,
    audio_path: PathBuf,
    transcript_path: Option<PathBuf>,
}

impl RecordingSession {
    pub fn new(
        config: RecorderConfig,
        mic_source: Box<dyn CaptureSource>,
        system_source: Box<dyn CaptureSource>,
        mic_engine: Arc<dyn RecognizerEngine>,
        system_engine: Arc<dyn RecognizerEngine>,
    ) -> Self {
        let session_id = format!("meeting-{}", uuid::Uuid::new_v4());
        info!("creating recording session: {}", session_id);

        Self {
            config,
            session_id,
            started_at: Utc::now(),
            is_recording: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                pending: Some(PendingParts {
                    mic_source,
                    system_source,
                    mic_engine,
                    system_engine,
                }),
                active: None,
                outcome: None,
                level_rx: None,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Start recording into `audio_path`; when `transcript_path` is given,
    /// per-channel fragments are flushed next to it during the session and
    /// the merged transcript is written there on stop.
    ///
    /// Components come up in dependency order: encoder sink, transcribers,
    /// mixer, then the capture sources. Unrecoverable bring-up failures
    /// (`EncoderInit`, `ModelUnavailable`, `LocaleUnsupported`) surface here.
    pub async fn start(
        &self,
        audio_path: impl AsRef<Path>,
        transcript_path: Option<PathBuf>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if self.is_recording.load(Ordering::SeqCst) {
            warn!("recording already started");
            return Ok(());
        }

        let parts = inner.pending.take().ok_or(SessionError::NotActive)?;
        let audio_path = audio_path.as_ref().to_path_buf();

        info!("starting recording session: {}", self.session_id);

        // 1. Encoder sink over the output artifact.
        let encoder = FlacEncoder::create(&audio_path, self.config.target_sample_rate)?;
        let (block_tx, block_rx) = mpsc::channel(self.encoder_queue_blocks());
        let encoder_task = tokio::spawn(encoder.run(block_rx));

        // 2. One streaming transcriber per channel, fed from the mixer taps.
        let (mic_tap_tx, mic_tap_rx) = mpsc::channel(self.tap_queue_blocks());
        let (system_tap_tx, system_tap_rx) = mpsc::channel(self.tap_queue_blocks());

        let mut mic_transcriber = StreamingTranscriber::start(
            parts.mic_engine,
            Speaker::Me,
            &self.config.locale,
            self.config.target_sample_rate,
            mic_tap_rx,
            transcript_path.as_deref().map(|p| fragment_path(p, Speaker::Me)),
            self.config.flush_interval(),
            None,
        )
        .await?;

        let mut system_transcriber = match StreamingTranscriber::start(
            parts.system_engine,
            Speaker::Them,
            &self.config.locale,
            self.config.target_sample_rate,
            system_tap_rx,
            transcript_path.as_deref().map(|p| fragment_path(p, Speaker::Them)),
            self.config.flush_interval(),
            None,
        )
        .await
        {
            Ok(transcriber) => transcriber,
            Err(e) => {
                mic_transcriber.cancel();
                return Err(e);
            }
        };

        // 3. Mixer core, wired to the encoder, the level channel and the taps.
        let (level_tx, level_rx) = mpsc::channel(LEVEL_QUEUE_EVENTS);
        let mut mixer = MixerCore::new(MixerConfig::from(&self.config), block_tx, level_tx);
        mixer.register_tap(ChannelSource::Microphone, mic_tap_tx);
        mixer.register_tap(ChannelSource::System, system_tap_tx);

        // 4-5. Session reference clock; sample index 0 is "now".
        let timebase = Timebase::new(self.config.host_clock_hz);
        mixer.set_base_host_tick(timebase.now_tick());

        let (mic_frame_tx, mic_frame_rx) = mpsc::channel(CAPTURE_QUEUE_FRAMES);
        let (system_frame_tx, system_frame_rx) = mpsc::channel(CAPTURE_QUEUE_FRAMES);
        let mixer_task = tokio::spawn(mixer.run(mic_frame_rx, system_frame_rx));

        // 6. External capture sources last.
        let mut mic_source = parts.mic_source;
        let mut system_source = parts.system_source;

        if let Err(e) = mic_source.start(timebase.clone(), mic_frame_tx).await {
            mic_transcriber.cancel();
            system_transcriber.cancel();
            return Err(SessionError::Capture(format!(
                "{}: {}",
                mic_source.name(),
                e
            )));
        }

        if let Err(e) = system_source.start(timebase, system_frame_tx).await {
            let _ = mic_source.stop().await;
            mic_transcriber.cancel();
            system_transcriber.cancel();
            return Err(SessionError::Capture(format!(
                "{}: {}",
                system_source.name(),
                e
            )));
        }

        self.is_recording.store(true, Ordering::SeqCst);
        inner.level_rx = Some(level_rx);
        inner.active = Some(ActiveRecording {
            mic_source,
            system_source,
            mixer_task,
            encoder_task,
            mic_transcriber,
            system_transcriber,
            audio_path,
            transcript_path,
        });

        info!("recording session started: {}", self.session_id);
        Ok(())
    }

    /// Stop recording, drain the pipeline and produce the merged transcript.
    ///
    /// Idempotent: a second call returns the outcome of the first. If an
    /// unrecoverable error surfaced mid-session the error is returned here,
    /// with the artifacts preserved up to the failure.
    pub async fn stop(&self, participants: &[String]) -> Result<SessionOutcome> {
        let mut inner = self.inner.lock().await;

        if let Some(outcome) = &inner.outcome {
            info!("session already stopped: {}", self.session_id);
            return Ok(outcome.clone());
        }

        let mut active = inner.active.take().ok_or(SessionError::NotActive)?;
        self.is_recording.store(false, Ordering::SeqCst);

        info!("stopping recording session: {}", self.session_id);

        // 1. Stop the capture sources; their queue senders drop, which lets
        // the mixer drain to end-of-stream.
        if let Err(e) = active.mic_source.stop().await {
            warn!("mic source stop failed: {}", e);
        }
        if let Err(e) = active.system_source.stop().await {
            warn!("system source stop failed: {}", e);
        }

        // 2-3. The mixer flushes the aligned remainder on channel close and
        // then the encoder finishes the artifact.
        let mut failure: Option<SessionError> = None;

        let mixer_summary = match active.mixer_task.await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                warn!("mixer failed: {}", e);
                failure = Some(e);
                MixerSummary::default()
            }
            Err(e) => {
                warn!("mixer task panicked: {}", e);
                MixerSummary::default()
            }
        };

        let encoder_summary = match active.encoder_task.await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                warn!("encoder failed: {}", e);
                if failure.is_none() {
                    failure = Some(e);
                }
                EncoderSummary::default()
            }
            Err(e) => {
                warn!("encoder task panicked: {}", e);
                EncoderSummary::default()
            }
        };

        // 4. Finalize both transcribers in parallel, each bounded by the
        // finalize deadline.
        let timeout = self.config.finalize_timeout();
        let (mic_finals, system_finals) = futures::join!(
            active.mic_transcriber.finalize(timeout),
            active.system_transcriber.finalize(timeout),
        );

        // 5. Merge and persist the transcript.
        let mic_count = mic_finals.len();
        let system_count = system_finals.len();

        let mut segments = mic_finals;
        segments.extend(system_finals);
        let markdown = merge_transcript(
            segments,
            (!participants.is_empty()).then_some(participants),
            self.config.speaker_gap_ms,
        );

        if let Some(path) = &active.transcript_path {
            if let Err(e) = std::fs::write(path, &markdown) {
                warn!("failed to write transcript to {}: {}", path.display(), e);
            }
        }

        let outcome = SessionOutcome {
            transcript_markdown: markdown,
            audio_path: active.audio_path,
            transcript_path: active.transcript_path,
            mic_segments: mic_count,
            system_segments: system_count,
            mixer: mixer_summary,
            encoder: encoder_summary,
        };

        info!(
            "recording session stopped: {} ({} frames, {}+{} segments)",
            self.session_id, outcome.mixer.output_frames, mic_count, system_count
        );

        inner.outcome = Some(outcome.clone());

        match failure {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Hand the level-event receiver to the embedding UI. Yields `Some`
    /// exactly once per session.
    pub async fn take_level_events(&self) -> Option<mpsc::Receiver<LevelEvent>> {
        self.inner.lock().await.level_rx.take()
    }

    pub async fn stats(&self) -> SessionStats {
        let inner = self.inner.lock().await;

        let (mic_segments, system_segments) = match (&inner.active, &inner.outcome) {
            (Some(active), _) => (
                active.mic_transcriber.final_segments().len(),
                active.system_transcriber.final_segments().len(),
            ),
            (None, Some(outcome)) => (outcome.mic_segments, outcome.system_segments),
            (None, None) => (0, 0),
        };

        SessionStats {
            is_recording: self.is_recording.load(Ordering::SeqCst),
            started_at: self.started_at,
            duration_secs: Utc::now()
                .signed_duration_since(self.started_at)
                .num_milliseconds() as f64
                / 1000.0,
            mic_segments,
            system_segments,
        }
    }

    /// Encoder handoff depth: ~2s of output blocks.
    fn encoder_queue_blocks(&self) -> usize {
        (2 * self.config.target_sample_rate as usize / self.config.block_size).max(2)
    }

    /// Tap handoff depth per transcriber: ~2s of pre-interleave blocks.
    fn tap_queue_blocks(&self) -> usize {
        (2 * self.config.target_sample_rate as usize / self.config.block_size).max(2)
    }
}

/// Per-channel fragment path beside the merged transcript:
/// `transcript.md` -> `transcript.me.md` / `transcript.them.md`.
fn fragment_path(transcript_path: &Path, speaker: Speaker) -> PathBuf {
    transcript_path.with_extension(format!("{}.md", speaker.slug()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_paths() {
        let base = Path::new("/tmp/out/transcript.md");
        assert_eq!(
            fragment_path(base, Speaker::Me),
            PathBuf::from("/tmp/out/transcript.me.md")
        );
        assert_eq!(
            fragment_path(base, Speaker::Them),
            PathBuf::from("/tmp/out/transcript.them.md")
        );
    }
}
