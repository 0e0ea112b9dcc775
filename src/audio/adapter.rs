//! Capture-source normalization (one adapter per source).
//!
//! Whatever a platform source delivers — i16 or f32, any rate, any channel
//! count — comes out of the adapter as 48kHz mono f32 with the per-source
//! gain applied. The converter is cached per format signature; sources that
//! renegotiate their format mid-session (device switch) invalidate it.

use tracing::{debug, warn};

use super::capture::{ChannelSource, SampleFrame, SamplePayload};
use super::resample::StreamConverter;
use crate::error::Result;

/// Format signature of a source's current stream; the converter cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FormatKey {
    sample_rate: u32,
    channels: u16,
    format: &'static str,
}

/// A normalized frame ready for the alignment buffer.
#[derive(Debug, Clone)]
pub struct AdaptedFrame {
    pub samples: Vec<f32>,
    pub host_tick: Option<u64>,
}

pub struct SourceAdapter {
    source: ChannelSource,
    target_rate: u32,
    gain: f32,
    converter: Option<(FormatKey, StreamConverter)>,
    /// Set after the first tick has been forwarded through a resampling
    /// converter; later ticks on that signature are suppressed because the
    /// chunked converter's buffering would make them run ahead of the
    /// samples actually emitted.
    anchored: bool,
    /// Anchor tick waiting for the converter to emit its first samples.
    pending_tick: Option<u64>,
    dropped_frames: u64,
}

impl SourceAdapter {
    pub fn new(source: ChannelSource, target_rate: u32, gain: f32) -> Self {
        Self {
            source,
            target_rate,
            gain,
            converter: None,
            anchored: false,
            pending_tick: None,
            dropped_frames: 0,
        }
    }

    /// Normalize one captured frame. Returns `None` for frames that carry no
    /// samples (dropped silently, per contract).
    pub fn adapt(&mut self, frame: SampleFrame) -> Result<Option<AdaptedFrame>> {
        if frame.payload.is_empty() || frame.channels == 0 {
            self.dropped_frames += 1;
            return Ok(None);
        }

        let key = FormatKey {
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            format: frame.payload.format_name(),
        };

        let mono = to_mono_f32(&frame.payload, frame.channels);

        if self
            .converter
            .as_ref()
            .map(|(cached, _)| *cached != key)
            .unwrap_or(true)
        {
            debug!(
                source = ?self.source,
                rate = key.sample_rate,
                channels = key.channels,
                format = key.format,
                "building converter for source format"
            );
            let converter = StreamConverter::new(frame.sample_rate, self.target_rate)?;
            self.converter = Some((key, converter));
            self.anchored = false;
            self.pending_tick = None;
        }

        let (_, converter) = self.converter.as_mut().expect("converter just cached");

        let mut samples = Vec::with_capacity(mono.len());
        converter.push(&mono, &mut samples)?;

        if self.gain != 1.0 {
            for sample in &mut samples {
                *sample *= self.gain;
            }
        }

        // Tick policy: a passthrough signature forwards every tick; a
        // resampled one only anchors on its first.
        if converter.is_passthrough() {
            return Ok(Some(AdaptedFrame {
                samples,
                host_tick: frame.host_tick,
            }));
        }

        let candidate = if self.anchored {
            None
        } else {
            self.pending_tick.or(frame.host_tick)
        };

        if samples.is_empty() {
            // Still accumulating a full converter chunk; keep the anchor
            // tick for the samples it will produce.
            self.pending_tick = candidate;
            return Ok(None);
        }

        if candidate.is_some() {
            self.anchored = true;
            self.pending_tick = None;
        }

        Ok(Some(AdaptedFrame {
            samples,
            host_tick: candidate,
        }))
    }

    /// Drain any samples still buffered in the converter.
    pub fn drain(&mut self) -> Result<Option<AdaptedFrame>> {
        let Some((_, converter)) = self.converter.as_mut() else {
            return Ok(None);
        };

        let mut samples = Vec::new();
        converter.finish(&mut samples)?;

        if samples.is_empty() {
            return Ok(None);
        }

        if self.gain != 1.0 {
            for sample in &mut samples {
                *sample *= self.gain;
            }
        }

        Ok(Some(AdaptedFrame {
            samples,
            host_tick: None,
        }))
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn source(&self) -> ChannelSource {
        self.source
    }
}

/// Convert a payload to f32 and average multichannel frames down to mono.
fn to_mono_f32(payload: &SamplePayload, channels: u16) -> Vec<f32> {
    let channels = channels as usize;

    let as_f32 = |i: usize| -> f32 {
        match payload {
            SamplePayload::F32(s) => s[i],
            SamplePayload::I16(s) => s[i] as f32 / 32768.0,
        }
    };

    if channels == 1 {
        return (0..payload.len()).map(as_f32).collect();
    }

    let frames = payload.len() / channels;
    if payload.len() % channels != 0 {
        warn!(
            "payload length {} not divisible by {} channels; truncating",
            payload.len(),
            channels
        );
    }

    let mut mono = Vec::with_capacity(frames);
    for frame in 0..frames {
        let mut sum = 0.0f32;
        for ch in 0..channels {
            sum += as_f32(frame * channels + ch);
        }
        mono.push(sum / channels as f32);
    }
    mono
}
