//! Per-channel soft limiter.
//!
//! Envelope follower with fast attack and slow release, driving a soft-knee
//! gain curve. One instance per channel; state carries across blocks.

/// Limiter tuning. Defaults assume 48kHz processing.
#[derive(Debug, Clone, Copy)]
pub struct LimiterParams {
    /// Linear amplitude where compression reaches full ratio.
    pub threshold: f32,
    /// Width of the soft knee centered on the threshold.
    pub knee: f32,
    /// Compression ratio above the knee.
    pub ratio: f32,
    /// Envelope attack coefficient (per sample).
    pub attack_coef: f32,
    /// Envelope release coefficient (per sample).
    pub release_coef: f32,
}

impl Default for LimiterParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            knee: 0.2,
            ratio: 8.0,
            attack_coef: 0.01,
            release_coef: 0.0004,
        }
    }
}

pub struct SoftLimiter {
    params: LimiterParams,
    env: f32,
}

impl SoftLimiter {
    pub fn new(params: LimiterParams) -> Self {
        Self { params, env: 0.0 }
    }

    /// Process a block in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        let p = self.params;
        let knee_start = p.threshold - p.knee / 2.0;
        let knee_end = p.threshold + p.knee / 2.0;

        for sample in samples {
            let level = sample.abs();

            // Envelope: fast attack, slow release.
            let coef = if level > self.env {
                p.attack_coef
            } else {
                p.release_coef
            };
            self.env = coef * level + (1.0 - coef) * self.env;

            let gain = if self.env <= knee_start {
                1.0
            } else if self.env < knee_end {
                // Inside the knee: ease the ratio in quadratically.
                let position = (self.env - knee_start) / p.knee;
                let compression_factor = position * position / 2.0;
                let overshoot = self.env - p.threshold;
                let reduction = overshoot * (1.0 - 1.0 / p.ratio) * compression_factor;
                (self.env - reduction) / self.env
            } else {
                let compressed = p.threshold + (self.env - p.threshold) / p.ratio;
                compressed / self.env
            };

            *sample *= gain;
        }
    }

    pub fn reset(&mut self) {
        self.env = 0.0;
    }
}
