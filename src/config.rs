use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a recording session.
///
/// Every field has a working default; callers typically start from
/// `RecorderConfig::default()` and override the handful of knobs they care
/// about, or load overrides from a config file with [`RecorderConfig::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Internal processing rate; also the rate of the output artifact.
    pub target_sample_rate: u32,

    /// Samples per mixer output block.
    pub block_size: usize,

    /// Per-channel warm-up sample count before the mixer starts emitting.
    pub startup_threshold: usize,

    /// Frames of crossfade applied across block boundaries.
    pub crossfade_len: usize,

    /// Sample slop absorbed without gap-fill or drops.
    pub jitter_tolerance: u64,

    /// Minimum interval between level events, in milliseconds.
    pub level_period_ms: u64,

    /// Per-channel transcript fragment flush cadence, in seconds.
    pub flush_interval_s: u64,

    /// Gap that forces a new speaker header in the merged transcript,
    /// in milliseconds.
    pub speaker_gap_ms: u64,

    /// Maximum wait for the recognizers to drain on stop, in seconds.
    pub finalize_timeout_s: u64,

    /// Linear gain applied to the microphone source.
    pub mic_gain: f32,

    /// Linear gain applied to the system-audio source.
    pub system_gain: f32,

    /// Soft-limiter threshold (linear amplitude).
    pub limiter_threshold: f32,

    /// Compression ratio above the limiter threshold.
    pub limiter_ratio: f32,

    /// Host tick frequency of the capture clock. Capture sources stamp
    /// frames with monotonic ticks at this rate (default: nanoseconds).
    pub host_clock_hz: u64,

    /// Locale hint handed to the recognizers.
    pub locale: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 48_000,
            block_size: 8192,
            startup_threshold: 9600,
            crossfade_len: 64,
            jitter_tolerance: 128,
            level_period_ms: 67,
            flush_interval_s: 10,
            speaker_gap_ms: 1500,
            finalize_timeout_s: 30,
            mic_gain: 1.0,
            system_gain: 1.0,
            limiter_threshold: 0.5,
            limiter_ratio: 8.0,
            host_clock_hz: 1_000_000_000,
            locale: "en-US".to_string(),
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a file, with defaults for anything unset.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn level_period(&self) -> Duration {
        Duration::from_millis(self.level_period_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_s)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_contract() {
        let config = RecorderConfig::default();

        assert_eq!(config.target_sample_rate, 48_000);
        assert_eq!(config.block_size, 8192);
        assert_eq!(config.startup_threshold, 9600);
        assert_eq!(config.crossfade_len, 64);
        assert_eq!(config.jitter_tolerance, 128);
        assert_eq!(config.level_period_ms, 67);
        assert_eq!(config.flush_interval_s, 10);
        assert_eq!(config.speaker_gap_ms, 1500);
        assert_eq!(config.finalize_timeout_s, 30);
        assert_eq!(config.mic_gain, 1.0);
        assert_eq!(config.system_gain, 1.0);
        assert_eq!(config.limiter_threshold, 0.5);
        assert_eq!(config.limiter_ratio, 8.0);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confero.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "block_size = 4096").unwrap();
        writeln!(file, "mic_gain = 1.5").unwrap();
        drop(file);

        let config = RecorderConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.mic_gain, 1.5);
        // untouched keys fall back to defaults
        assert_eq!(config.startup_threshold, 9600);
        assert_eq!(config.locale, "en-US");
    }

    #[test]
    fn test_duration_helpers() {
        let config = RecorderConfig::default();
        assert_eq!(config.level_period(), Duration::from_millis(67));
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.finalize_timeout(), Duration::from_secs(30));
    }
}
