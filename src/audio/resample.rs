//! Streaming sample-rate conversion.
//!
//! Capture sources deliver variable-length buffers, while the sinc resampler
//! wants fixed-size input chunks. The converter buffers incoming mono samples
//! and processes full chunks as they become available; the remainder waits
//! for the next push.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::collections::VecDeque;

use crate::error::{Result, SessionError};

pub struct StreamConverter {
    source_rate: u32,
    target_rate: u32,
    resampler: Option<SincFixedIn<f32>>,
    pending: VecDeque<f32>,
    chunk_size: usize,
    scratch: Vec<f32>,
}

impl StreamConverter {
    /// Create a mono converter from `source_rate` to `target_rate`.
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(SessionError::AudioFormatUnsupported(
                "sample rate cannot be zero".to_string(),
            ));
        }

        // Process 100ms of input at a time.
        let chunk_size = (source_rate as usize / 10).max(1);

        let resampler = if source_rate != target_rate {
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };

            Some(
                SincFixedIn::<f32>::new(
                    target_rate as f64 / source_rate as f64,
                    2.0,
                    params,
                    chunk_size,
                    1,
                )
                .map_err(|e| {
                    SessionError::AudioFormatUnsupported(format!(
                        "cannot resample {}Hz to {}Hz: {}",
                        source_rate, target_rate, e
                    ))
                })?,
            )
        } else {
            None
        };

        Ok(Self {
            source_rate,
            target_rate,
            resampler,
            pending: VecDeque::with_capacity(chunk_size * 2),
            chunk_size,
            scratch: Vec::with_capacity(chunk_size),
        })
    }

    /// True when no rate conversion is performed and samples pass through
    /// unchanged (and unbuffered).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Push mono samples; converted output is appended to `out`.
    pub fn push(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend(input.iter());

        while self.pending.len() >= self.chunk_size {
            self.scratch.clear();
            self.scratch
                .extend(self.pending.drain(..self.chunk_size));

            let resampled = resampler
                .process(&[&self.scratch], None)
                .map_err(|e| SessionError::AudioFormatUnsupported(e.to_string()))?;

            out.extend_from_slice(&resampled[0]);
        }

        Ok(())
    }

    /// Drain the buffered remainder, zero-padding the final chunk.
    pub fn finish(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };

        if self.pending.is_empty() {
            return Ok(());
        }

        let mut tail: Vec<f32> = self.pending.drain(..).collect();
        let produced = tail.len() as f64 * self.target_rate as f64 / self.source_rate as f64;
        tail.resize(self.chunk_size, 0.0);

        let resampled = resampler
            .process(&[&tail], None)
            .map_err(|e| SessionError::AudioFormatUnsupported(e.to_string()))?;

        // Keep only the part that corresponds to real input.
        let keep = (produced.round() as usize).min(resampled[0].len());
        out.extend_from_slice(&resampled[0][..keep]);

        Ok(())
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }
}
