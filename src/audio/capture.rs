use anyhow::Result;
use std::time::Instant;
use tokio::sync::mpsc;

/// Which capture source a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSource {
    /// Microphone input (the local speaker).
    Microphone,
    /// System audio (remote participants, applications, browser).
    System,
}

/// Raw sample data as delivered by a capture source.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplePayload {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

impl SamplePayload {
    /// Total sample count across all channels.
    pub fn len(&self) -> usize {
        match self {
            SamplePayload::F32(s) => s.len(),
            SamplePayload::I16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn format_name(&self) -> &'static str {
        match self {
            SamplePayload::F32(_) => "f32",
            SamplePayload::I16(_) => "i16",
        }
    }
}

/// One buffer of audio from a capture source, in whatever format the
/// platform delivered it.
///
/// `host_tick` is a monotonic tick (at the session's `host_clock_hz`) at the
/// first sample of the buffer. A frame without one is treated as arriving
/// back-to-back with the previous frame of the same source.
#[derive(Debug, Clone)]
pub struct SampleFrame {
    pub source: ChannelSource,
    pub payload: SamplePayload,
    /// Nominal sample rate of the payload (may differ from the target rate).
    pub sample_rate: u32,
    /// Channel count of the payload (interleaved if > 1).
    pub channels: u16,
    pub host_tick: Option<u64>,
}

/// Monotonic session clock handed to capture sources so their frame ticks
/// and the session's reference point share one timebase.
#[derive(Debug, Clone)]
pub struct Timebase {
    origin: Instant,
    hz: u64,
}

impl Timebase {
    pub fn new(hz: u64) -> Self {
        Self {
            origin: Instant::now(),
            hz,
        }
    }

    /// Current tick, `hz` ticks per second since the timebase was created.
    pub fn now_tick(&self) -> u64 {
        let elapsed = self.origin.elapsed();
        elapsed
            .as_secs()
            .saturating_mul(self.hz)
            .saturating_add(elapsed.subsec_nanos() as u64 * self.hz / 1_000_000_000)
    }

    pub fn hz(&self) -> u64 {
        self.hz
    }
}

/// An external capture source (platform microphone, system-audio loopback,
/// or a file replay).
///
/// Implementations push frames into `sink` until stopped. The delivery path
/// may run on an arbitrary OS thread and must stay cheap: stamp the frame,
/// `try_send` it, and return. When the queue is full the frame is dropped
/// (the session sizes the queue for several seconds of slack).
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Start delivering frames into `sink`.
    async fn start(&mut self, timebase: Timebase, sink: mpsc::Sender<SampleFrame>) -> Result<()>;

    /// Stop capturing. Implementations drop their `sink` clone here so the
    /// consumer observes end-of-stream.
    async fn stop(&mut self) -> Result<()>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_len() {
        assert_eq!(SamplePayload::F32(vec![0.0; 4]).len(), 4);
        assert_eq!(SamplePayload::I16(vec![0; 7]).len(), 7);
        assert!(SamplePayload::F32(Vec::new()).is_empty());
    }

    #[test]
    fn test_timebase_monotonic() {
        let timebase = Timebase::new(1_000_000_000);
        let a = timebase.now_tick();
        let b = timebase.now_tick();
        assert!(b >= a);
    }
}
