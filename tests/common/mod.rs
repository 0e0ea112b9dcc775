// Shared test doubles for the pipeline integration tests.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use confero::{
    CaptureSource, ChannelSource, EngineResult, RecognizerEngine, ResultRun, SampleFrame,
    SamplePayload, SessionError, Timebase,
};

/// Capture source that replays a scripted list of frames and closes.
pub struct MockCaptureSource {
    name: String,
    frames: Option<Vec<SampleFrame>>,
    task: Option<JoinHandle<()>>,
}

impl MockCaptureSource {
    pub fn new(name: &str, frames: Vec<SampleFrame>) -> Self {
        Self {
            name: name.to_string(),
            frames: Some(frames),
            task: None,
        }
    }
}

#[async_trait]
impl CaptureSource for MockCaptureSource {
    async fn start(&mut self, _timebase: Timebase, sink: mpsc::Sender<SampleFrame>) -> Result<()> {
        let frames = self.frames.take().expect("mock source started twice");
        self.task = Some(tokio::spawn(async move {
            for frame in frames {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build a mono f32 frame for one channel.
pub fn f32_frame(
    source: ChannelSource,
    samples: Vec<f32>,
    host_tick: Option<u64>,
) -> SampleFrame {
    SampleFrame {
        source,
        payload: SamplePayload::F32(samples),
        sample_rate: 48_000,
        channels: 1,
        host_tick,
    }
}

/// `count` zero samples split into ~100ms frames, first frame carrying tick 0.
pub fn zero_frames(source: ChannelSource, count: usize) -> Vec<SampleFrame> {
    let mut frames = Vec::new();
    let mut remaining = count;
    let mut first = true;
    while remaining > 0 {
        let len = remaining.min(4800);
        frames.push(f32_frame(
            source,
            vec![0.0; len],
            if first { Some(0) } else { None },
        ));
        first = false;
        remaining -= len;
    }
    frames
}

/// Scripted recognizer: counts pushed audio, supports live result injection,
/// and emits its scripted finals when asked to finalize.
pub struct MockRecognizer {
    rate: u32,
    scripted: Mutex<Vec<EngineResult>>,
    live_tx: Mutex<Option<mpsc::Sender<EngineResult>>>,
    pushed_samples: AtomicUsize,
    fail_start: Mutex<Option<SessionError>>,
}

impl MockRecognizer {
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            scripted: Mutex::new(Vec::new()),
            live_tx: Mutex::new(None),
            pushed_samples: AtomicUsize::new(0),
            fail_start: Mutex::new(None),
        }
    }

    /// Results emitted (in order) when `finalize` is called.
    pub fn with_finals(self, results: Vec<EngineResult>) -> Self {
        *self.scripted.lock().unwrap() = results;
        self
    }

    /// Make `start` fail with the given error.
    pub fn failing(rate: u32, error: SessionError) -> Self {
        let mock = Self::new(rate);
        *mock.fail_start.lock().unwrap() = Some(error);
        mock
    }

    pub fn pushed_samples(&self) -> usize {
        self.pushed_samples.load(Ordering::SeqCst)
    }

    /// Inject a result into the live stream, as a running engine would.
    pub async fn emit(&self, result: EngineResult) {
        let tx = self.live_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            tx.send(result).await.expect("result stream closed");
        }
    }
}

#[async_trait]
impl RecognizerEngine for MockRecognizer {
    fn preferred_sample_rate(&self) -> u32 {
        self.rate
    }

    async fn start(&self, _locale: &str) -> Result<mpsc::Receiver<EngineResult>, SessionError> {
        if let Some(error) = self.fail_start.lock().unwrap().take() {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(64);
        *self.live_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn push_audio(&self, samples: &[f32]) {
        self.pushed_samples.fetch_add(samples.len(), Ordering::SeqCst);
    }

    async fn finalize(&self) {
        let tx = self.live_tx.lock().unwrap().take();
        let scripted: Vec<EngineResult> = self.scripted.lock().unwrap().drain(..).collect();

        if let Some(tx) = tx {
            for result in scripted {
                let _ = tx.send(result).await;
            }
        }
        // Dropping the sender closes the result stream.
    }

    fn abort(&self) {
        self.live_tx.lock().unwrap().take();
    }
}

/// A final result with one timed run spanning `[start_ms, end_ms]`.
pub fn final_result(start_ms: u64, end_ms: u64, text: &str) -> EngineResult {
    EngineResult {
        text: text.to_string(),
        runs: vec![ResultRun {
            start_ms,
            duration_ms: end_ms - start_ms,
            text_fragment: text.to_string(),
        }],
        is_final: true,
    }
}

pub fn volatile_result(start_ms: u64, end_ms: u64, text: &str) -> EngineResult {
    EngineResult {
        is_final: false,
        ..final_result(start_ms, end_ms, text)
    }
}
