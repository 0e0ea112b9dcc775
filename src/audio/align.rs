//! Per-channel timeline alignment.
//!
//! Each source gets an `AlignmentBuffer` that positions incoming blocks on
//! that source's sample timeline. A block with a host tick lands at the
//! index derived from the tick; drift within the jitter window is absorbed,
//! a source that fell further behind is gap-filled with silence, and a block
//! that overlaps the timeline already written has its overlapping prefix
//! dropped.

use std::collections::VecDeque;
use tracing::{debug, warn};

/// Shared session reference clock: converts host ticks into sample indices.
///
/// Both channels share one instance so their timelines are anchored to the
/// same base tick. The base is normally set by the session coordinator at
/// start; if unset, the first tick seen becomes the base.
#[derive(Debug)]
pub struct SessionClock {
    sample_rate: u32,
    host_clock_hz: u64,
    base_host_tick: Option<u64>,
}

impl SessionClock {
    pub fn new(sample_rate: u32, host_clock_hz: u64) -> Self {
        Self {
            sample_rate,
            host_clock_hz,
            base_host_tick: None,
        }
    }

    pub fn set_base(&mut self, tick: u64) {
        self.base_host_tick = Some(tick);
    }

    /// Sample index corresponding to `tick`, anchoring the base on first use.
    pub fn sample_index_for(&mut self, tick: u64) -> u64 {
        let base = *self.base_host_tick.get_or_insert(tick);
        let elapsed = tick.saturating_sub(base);
        (elapsed as f64 / self.host_clock_hz as f64 * self.sample_rate as f64).round() as u64
    }
}

pub struct AlignmentBuffer {
    samples: VecDeque<f32>,
    expected_sample_index: u64,
    jitter_tolerance: u64,
    gap_filled_samples: u64,
    overlap_dropped_samples: u64,
}

impl AlignmentBuffer {
    pub fn new(jitter_tolerance: u64) -> Self {
        Self {
            samples: VecDeque::new(),
            expected_sample_index: 0,
            jitter_tolerance,
            gap_filled_samples: 0,
            overlap_dropped_samples: 0,
        }
    }

    /// Append a block that claims to begin at `start_idx` (or back-to-back
    /// when `None`).
    pub fn append(&mut self, block: &[f32], start_idx: Option<u64>) {
        if block.is_empty() {
            return;
        }

        let start_idx = start_idx.unwrap_or(self.expected_sample_index);
        let delta = start_idx as i64 - self.expected_sample_index as i64;

        if delta > self.jitter_tolerance as i64 {
            // The source fell behind; fill the gap with silence.
            debug!(
                gap = delta,
                expected = self.expected_sample_index,
                "gap-filling source timeline"
            );
            self.samples.extend(std::iter::repeat(0.0f32).take(delta as usize));
            self.samples.extend(block.iter().copied());
            self.gap_filled_samples += delta as u64;
            self.expected_sample_index += delta as u64 + block.len() as u64;
        } else if delta < -(self.jitter_tolerance as i64) {
            // The block overlaps the timeline already written; drop the
            // overlapping prefix.
            let skip = (-delta) as usize;
            if skip >= block.len() {
                warn!(
                    overlap = skip,
                    len = block.len(),
                    "dropping whole block overlapping existing timeline"
                );
                self.overlap_dropped_samples += block.len() as u64;
                return;
            }
            self.samples.extend(block[skip..].iter().copied());
            self.overlap_dropped_samples += skip as u64;
            self.expected_sample_index += (block.len() - skip) as u64;
        } else {
            // In position, or within the jitter window on either side.
            self.samples.extend(block.iter().copied());
            self.expected_sample_index += block.len() as u64;
        }
    }

    /// Pop exactly `n` samples. Callers check `len()` first.
    pub fn pop(&mut self, n: usize) -> Vec<f32> {
        debug_assert!(n <= self.samples.len());
        self.samples.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total samples ever appended, silence gap-fill included.
    pub fn expected_sample_index(&self) -> u64 {
        self.expected_sample_index
    }

    pub fn gap_filled_samples(&self) -> u64 {
        self.gap_filled_samples
    }

    pub fn overlap_dropped_samples(&self) -> u64 {
        self.overlap_dropped_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_to_back_appends() {
        let mut buf = AlignmentBuffer::new(128);
        buf.append(&[0.1; 100], None);
        buf.append(&[0.2; 50], None);

        assert_eq!(buf.len(), 150);
        assert_eq!(buf.expected_sample_index(), 150);
        assert_eq!(buf.gap_filled_samples(), 0);
        assert_eq!(buf.overlap_dropped_samples(), 0);
    }

    #[test]
    fn test_jitter_within_tolerance_absorbed() {
        let mut buf = AlignmentBuffer::new(128);
        buf.append(&[0.1; 1024], Some(0));
        // Claims to start 100 samples early: inside the jitter window.
        buf.append(&[0.2; 1024], Some(1024 - 100));

        assert_eq!(buf.len(), 2048);
        assert_eq!(buf.expected_sample_index(), 2048);
        assert_eq!(buf.gap_filled_samples(), 0);
        assert_eq!(buf.overlap_dropped_samples(), 0);
    }

    #[test]
    fn test_arrival_jitter_absorbed_both_directions() {
        // Ticks wobble a couple of samples around nominal (50us at 48kHz is
        // ~2.4 samples): no silence, no drops, the index tracks the
        // cumulative frame lengths exactly.
        let mut buf = AlignmentBuffer::new(128);
        for i in 0..50u64 {
            let nominal = i * 1024;
            let wobble = if i % 2 == 0 { 2 } else { 0 };
            buf.append(&[0.0; 1024], Some(nominal + wobble));
        }
        assert_eq!(buf.expected_sample_index(), 50 * 1024);
        assert_eq!(buf.len(), 50 * 1024);
        assert_eq!(buf.gap_filled_samples(), 0);
        assert_eq!(buf.overlap_dropped_samples(), 0);
    }

    #[test]
    fn test_lateness_beyond_tolerance_gap_fills() {
        let mut buf = AlignmentBuffer::new(128);
        buf.append(&[0.5; 1024], Some(0));
        // 129 samples late: one past the window, silence fills the gap.
        buf.append(&[0.5; 1024], Some(1024 + 129));

        assert_eq!(buf.gap_filled_samples(), 129);
        assert_eq!(buf.expected_sample_index(), 2048 + 129);
    }

    #[test]
    fn test_source_behind_gap_fills() {
        let mut buf = AlignmentBuffer::new(128);
        buf.append(&[0.5; 1000], Some(0));
        // Next block claims index 1500: 500 samples of silence first.
        buf.append(&[0.5; 1000], Some(1500));

        assert_eq!(buf.len(), 2500);
        assert_eq!(buf.expected_sample_index(), 2500);
        assert_eq!(buf.gap_filled_samples(), 500);

        let samples = buf.pop(2500);
        assert_eq!(samples[999], 0.5);
        assert_eq!(samples[1000], 0.0);
        assert_eq!(samples[1499], 0.0);
        assert_eq!(samples[1500], 0.5);
    }

    #[test]
    fn test_overlap_drops_prefix() {
        let mut buf = AlignmentBuffer::new(128);
        buf.append(&[0.1; 2000], Some(0));
        // Claims to start 500 samples before the expected index.
        buf.append(&[0.9; 1000], Some(1500));

        assert_eq!(buf.len(), 2500);
        assert_eq!(buf.expected_sample_index(), 2500);
        assert_eq!(buf.overlap_dropped_samples(), 500);
    }

    #[test]
    fn test_overlap_larger_than_block_drops_all() {
        let mut buf = AlignmentBuffer::new(128);
        buf.append(&[0.1; 2000], Some(0));
        buf.append(&[0.9; 300], Some(1500));

        assert_eq!(buf.len(), 2000);
        assert_eq!(buf.expected_sample_index(), 2000);
        assert_eq!(buf.overlap_dropped_samples(), 300);
    }

    #[test]
    fn test_expected_index_counts_appends_not_pops() {
        let mut buf = AlignmentBuffer::new(128);
        buf.append(&[0.1; 1000], None);
        buf.pop(600);

        assert_eq!(buf.len(), 400);
        assert_eq!(buf.expected_sample_index(), 1000);
    }

    #[test]
    fn test_clock_base_from_first_tick() {
        let mut clock = SessionClock::new(48_000, 1_000_000_000);
        assert_eq!(clock.sample_index_for(5_000_000_000), 0);
        // One second later: 48000 samples.
        assert_eq!(clock.sample_index_for(6_000_000_000), 48_000);
    }

    #[test]
    fn test_clock_explicit_base() {
        let mut clock = SessionClock::new(48_000, 1_000_000_000);
        clock.set_base(1_000_000_000);
        // Half a second after base.
        assert_eq!(clock.sample_index_for(1_500_000_000), 24_000);
    }

    #[test]
    fn test_clock_sub_sample_rounding() {
        let mut clock = SessionClock::new(48_000, 1_000_000_000);
        clock.set_base(0);
        // 50us at 48kHz = 2.4 samples, rounds to 2.
        assert_eq!(clock.sample_index_for(50_000), 2);
    }
}
