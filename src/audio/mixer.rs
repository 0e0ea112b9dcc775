// Stereo mixer for the microphone and system-audio streams
//
// The mixer owns both per-channel alignment buffers and runs as a single
// dedicated task: frames arrive on two bounded queues, get normalized by the
// per-source adapters, and land on their channel's timeline. Once both
// channels have warmed up past the startup threshold, the mixer repeatedly
// pops matched blocks, taps them for the transcribers, meters them, limits
// them, and interleaves them into stereo output with a short crossfade across
// block boundaries. Channel assignment is fixed: left = microphone,
// right = system.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use super::adapter::SourceAdapter;
use super::align::{AlignmentBuffer, SessionClock};
use super::capture::{ChannelSource, SampleFrame};
use super::limiter::{LimiterParams, SoftLimiter};
use crate::config::RecorderConfig;
use crate::error::Result;

/// Configuration for the mixer core.
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Target sample rate for output.
    pub sample_rate: u32,
    /// Samples popped from each channel per output block.
    pub block_size: usize,
    /// Per-channel warm-up sample count before the first output block.
    pub startup_threshold: usize,
    /// Frames of crossfade across block boundaries.
    pub crossfade_len: usize,
    /// Alignment slop absorbed without gap-fill.
    pub jitter_tolerance: u64,
    /// Minimum interval between level events.
    pub level_period: Duration,
    /// Host tick frequency of frame timestamps.
    pub host_clock_hz: u64,
    pub mic_gain: f32,
    pub system_gain: f32,
    pub limiter: LimiterParams,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self::from(&RecorderConfig::default())
    }
}

impl From<&RecorderConfig> for MixerConfig {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            sample_rate: config.target_sample_rate,
            block_size: config.block_size,
            startup_threshold: config.startup_threshold,
            crossfade_len: config.crossfade_len,
            jitter_tolerance: config.jitter_tolerance,
            level_period: config.level_period(),
            host_clock_hz: config.host_clock_hz,
            mic_gain: config.mic_gain,
            system_gain: config.system_gain,
            limiter: LimiterParams {
                threshold: config.limiter_threshold,
                ratio: config.limiter_ratio,
                ..LimiterParams::default()
            },
        }
    }
}

/// Momentary channel levels, normalized to [0, 1] over a -60dBFS floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelEvent {
    pub mic_rms_unit: f32,
    pub system_rms_unit: f32,
}

/// One interleaved stereo output block (left = mic, right = system).
#[derive(Debug, Clone)]
pub struct StereoBlock {
    /// Index of the first frame of this block on the output timeline.
    pub output_sample_index: u64,
    /// Interleaved f32 samples; `2 * frame_count()` long.
    pub samples: Vec<f32>,
}

impl StereoBlock {
    pub fn frame_count(&self) -> usize {
        self.samples.len() / 2
    }

    /// Presentation time of the first frame, in seconds.
    pub fn presentation_secs(&self, sample_rate: u32) -> f64 {
        self.output_sample_index as f64 / sample_rate as f64
    }
}

/// Degradation counters for one channel, reported in the mixer summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneSummary {
    pub gap_filled_samples: u64,
    pub overlap_dropped_samples: u64,
    pub adapter_dropped_frames: u64,
    pub tap_dropped_blocks: u64,
}

/// Totals reported when the mixer drains and exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct MixerSummary {
    /// Total stereo frames emitted.
    pub output_frames: u64,
    /// Output blocks dropped because the encoder queue was full.
    pub encoder_dropped_blocks: u64,
    pub mic: LaneSummary,
    pub system: LaneSummary,
}

struct ChannelLane {
    adapter: SourceAdapter,
    buffer: AlignmentBuffer,
    limiter: SoftLimiter,
    tap: Option<mpsc::Sender<Vec<f32>>>,
    tap_dropped_blocks: u64,
}

impl ChannelLane {
    fn new(source: ChannelSource, config: &MixerConfig, gain: f32) -> Self {
        Self {
            adapter: SourceAdapter::new(source, config.sample_rate, gain),
            buffer: AlignmentBuffer::new(config.jitter_tolerance),
            limiter: SoftLimiter::new(config.limiter),
            tap: None,
            tap_dropped_blocks: 0,
        }
    }

    fn ingest(&mut self, clock: &mut SessionClock, frame: SampleFrame) -> Result<()> {
        if let Some(adapted) = self.adapter.adapt(frame)? {
            let start_idx = adapted.host_tick.map(|tick| clock.sample_index_for(tick));
            self.buffer.append(&adapted.samples, start_idx);
        }
        Ok(())
    }

    /// Push converter leftovers onto the timeline at session end.
    fn drain_adapter(&mut self) -> Result<()> {
        if let Some(adapted) = self.adapter.drain()? {
            self.buffer.append(&adapted.samples, None);
        }
        Ok(())
    }

    /// Hand a pre-limit mono block to the tap, if one is listening.
    fn offer_tap(&mut self, block: &[f32]) {
        let Some(tap) = &self.tap else {
            return;
        };
        match tap.try_send(block.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.tap_dropped_blocks += 1;
            }
            Err(TrySendError::Closed(_)) => {
                // The transcriber is gone; stop producing tap events.
                self.tap = None;
            }
        }
    }

    fn summary(&self) -> LaneSummary {
        LaneSummary {
            gap_filled_samples: self.buffer.gap_filled_samples(),
            overlap_dropped_samples: self.buffer.overlap_dropped_samples(),
            adapter_dropped_frames: self.adapter.dropped_frames(),
            tap_dropped_blocks: self.tap_dropped_blocks,
        }
    }
}

pub struct MixerCore {
    config: MixerConfig,
    clock: SessionClock,
    mic: ChannelLane,
    system: ChannelLane,
    started: bool,
    output_sample_index: u64,
    previous_tail: Vec<f32>,
    last_level_at: Option<Instant>,
    level_tx: mpsc::Sender<LevelEvent>,
    out_tx: Option<mpsc::Sender<StereoBlock>>,
    encoder_dropped_blocks: u64,
}

impl MixerCore {
    pub fn new(
        config: MixerConfig,
        out_tx: mpsc::Sender<StereoBlock>,
        level_tx: mpsc::Sender<LevelEvent>,
    ) -> Self {
        info!(
            "mixer initialized: {}Hz, block={} samples, warmup={} samples",
            config.sample_rate, config.block_size, config.startup_threshold
        );

        let clock = SessionClock::new(config.sample_rate, config.host_clock_hz);
        let mic = ChannelLane::new(ChannelSource::Microphone, &config, config.mic_gain);
        let system = ChannelLane::new(ChannelSource::System, &config, config.system_gain);

        Self {
            config,
            clock,
            mic,
            system,
            started: false,
            output_sample_index: 0,
            previous_tail: Vec::new(),
            last_level_at: None,
            level_tx,
            out_tx: Some(out_tx),
            encoder_dropped_blocks: 0,
        }
    }

    /// Anchor the session timeline: sample index 0 corresponds to `tick`.
    pub fn set_base_host_tick(&mut self, tick: u64) {
        self.clock.set_base(tick);
    }

    /// Register the pre-interleave tap for one channel. The mixer never
    /// extends the reader's lifetime; a closed receiver silently unregisters
    /// the tap.
    pub fn register_tap(&mut self, source: ChannelSource, tap: mpsc::Sender<Vec<f32>>) {
        match source {
            ChannelSource::Microphone => self.mic.tap = Some(tap),
            ChannelSource::System => self.system.tap = Some(tap),
        }
    }

    /// Consume frames until both sources close, then flush the remainder.
    ///
    /// All mixing state lives on this task; the receivers are the bounded
    /// per-channel handoff queues the capture sources feed.
    pub async fn run(
        mut self,
        mut mic_rx: mpsc::Receiver<SampleFrame>,
        mut system_rx: mpsc::Receiver<SampleFrame>,
    ) -> Result<MixerSummary> {
        let mut mic_open = true;
        let mut system_open = true;

        while mic_open || system_open {
            tokio::select! {
                frame = mic_rx.recv(), if mic_open => match frame {
                    Some(frame) => self.mic.ingest(&mut self.clock, frame)?,
                    None => mic_open = false,
                },
                frame = system_rx.recv(), if system_open => match frame {
                    Some(frame) => self.system.ingest(&mut self.clock, frame)?,
                    None => system_open = false,
                },
            }

            self.pump().await;
        }

        self.flush().await;

        let summary = MixerSummary {
            output_frames: self.output_sample_index,
            encoder_dropped_blocks: self.encoder_dropped_blocks,
            mic: self.mic.summary(),
            system: self.system.summary(),
        };

        info!(
            "mixer drained: {} frames emitted, mic gap-fill {} / overlap-drop {}, system gap-fill {} / overlap-drop {}",
            summary.output_frames,
            summary.mic.gap_filled_samples,
            summary.mic.overlap_dropped_samples,
            summary.system.gap_filled_samples,
            summary.system.overlap_dropped_samples,
        );

        Ok(summary)
    }

    /// Emit as many full blocks as both buffers jointly permit.
    async fn pump(&mut self) {
        if !self.started {
            if self.mic.buffer.len() >= self.config.startup_threshold
                && self.system.buffer.len() >= self.config.startup_threshold
            {
                self.started = true;
                info!(
                    "both channels warmed up ({} samples); mixer emitting",
                    self.config.startup_threshold
                );
            } else {
                return;
            }
        }

        while self.mic.buffer.len() >= self.config.block_size
            && self.system.buffer.len() >= self.config.block_size
        {
            self.emit_block(self.config.block_size);
            // Let level/tap consumers breathe between blocks.
            tokio::task::yield_now().await;
        }
    }

    /// Drain whatever both channels still share after the sources closed.
    /// Never pads: output ends at the shorter stream.
    async fn flush(&mut self) {
        if let Err(e) = self.mic.drain_adapter() {
            warn!("mic converter drain failed: {}", e);
        }
        if let Err(e) = self.system.drain_adapter() {
            warn!("system converter drain failed: {}", e);
        }

        // Emit any full blocks first if the gate had opened.
        self.pump().await;

        let remainder = self.mic.buffer.len().min(self.system.buffer.len());
        if remainder > 0 {
            self.emit_block(remainder);
        }
    }

    /// Tap, meter, limit, interleave, crossfade and ship one output block of
    /// `n` samples per channel.
    fn emit_block(&mut self, n: usize) {
        let mic_block = self.mic.buffer.pop(n);
        let system_block = self.system.buffer.pop(n);

        self.mic.offer_tap(&mic_block);
        self.system.offer_tap(&system_block);

        self.report_levels(&mic_block, &system_block);

        let mut mic_block = mic_block;
        let mut system_block = system_block;
        self.mic.limiter.process(&mut mic_block);
        self.system.limiter.process(&mut system_block);

        // Interleave: left = mic, right = system.
        let mut stereo = Vec::with_capacity(n * 2);
        for i in 0..n {
            stereo.push(mic_block[i]);
            stereo.push(system_block[i]);
        }

        self.crossfade(&mut stereo);

        // Remember the block tail for the next boundary.
        let tail_len = (self.config.crossfade_len * 2).min(stereo.len());
        self.previous_tail.clear();
        self.previous_tail
            .extend_from_slice(&stereo[stereo.len() - tail_len..]);

        let block = StereoBlock {
            output_sample_index: self.output_sample_index,
            samples: stereo,
        };
        self.output_sample_index += n as u64;

        if let Some(out_tx) = &self.out_tx {
            match out_tx.try_send(block) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.encoder_dropped_blocks += 1;
                    warn!("encoder queue full; dropped a {}-frame block", n);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("encoder queue closed; output stops being recorded");
                    self.out_tx = None;
                }
            }
        }
    }

    /// Blend the first `crossfade_len` frames with the previous block's tail
    /// to keep block boundaries click-free.
    fn crossfade(&mut self, stereo: &mut [f32]) {
        if self.previous_tail.is_empty() {
            return;
        }

        let fade_frames = (self.previous_tail.len() / 2)
            .min(self.config.crossfade_len)
            .min(stereo.len() / 2);

        for k in 0..fade_frames {
            let t = k as f32 / self.config.crossfade_len as f32;
            for ch in 0..2 {
                let i = k * 2 + ch;
                stereo[i] = self.previous_tail[i] * (1.0 - t) + stereo[i] * t;
            }
        }
    }

    /// Throttled RMS metering on the pre-limit blocks.
    fn report_levels(&mut self, mic_block: &[f32], system_block: &[f32]) {
        let due = match self.last_level_at {
            None => true,
            Some(at) => at.elapsed() >= self.config.level_period,
        };
        if !due {
            return;
        }
        self.last_level_at = Some(Instant::now());

        let event = LevelEvent {
            mic_rms_unit: rms_unit(mic_block),
            system_rms_unit: rms_unit(system_block),
        };

        // Lossy by design: a slow consumer misses events, never stalls audio.
        let _ = self.level_tx.try_send(event);
    }
}

/// RMS mapped through dBFS onto a [0, 1] meter with a -60dB floor.
pub fn rms_unit(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = mean_sq.sqrt();
    let db = 20.0 * rms.max(1e-10).log10();
    ((db + 60.0) / 60.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_unit_silence_is_floor() {
        assert_eq!(rms_unit(&[0.0; 512]), 0.0);
        assert_eq!(rms_unit(&[]), 0.0);
    }

    #[test]
    fn test_rms_unit_full_scale_is_one() {
        // rms = 1.0 -> 0dBFS -> unit 1.0
        assert!((rms_unit(&[1.0; 512]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rms_unit_midrange() {
        // rms = 0.1 -> -20dBFS -> (-20+60)/60 = 0.6667
        let unit = rms_unit(&[0.1; 512]);
        assert!((unit - 2.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_stereo_block_timing() {
        let block = StereoBlock {
            output_sample_index: 48_000,
            samples: vec![0.0; 2048],
        };
        assert_eq!(block.frame_count(), 1024);
        assert!((block.presentation_secs(48_000) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_config_from_recorder_config() {
        let mut recorder = RecorderConfig::default();
        recorder.limiter_threshold = 0.4;
        recorder.limiter_ratio = 4.0;

        let config = MixerConfig::from(&recorder);
        assert_eq!(config.block_size, 8192);
        assert_eq!(config.limiter.threshold, 0.4);
        assert_eq!(config.limiter.ratio, 4.0);
        // untouched limiter internals keep their defaults
        assert_eq!(config.limiter.knee, 0.2);
    }
}
