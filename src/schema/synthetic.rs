//! Seeded synthetic face generator.
//!
//! Produces plausible-looking samples (breathing blend shapes, a slow head
//! sway, occasional tracking dropouts) with jittered timestamps. Used in
//! place of a real tracking device for demos and for building test takes.

use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::sample::{FaceSample, Pose};

/// Generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Number of blend shapes to animate.
    pub blend_shape_count: usize,
    /// Nominal sample rate of the fake tracker.
    pub rate_hz: f32,
    /// Standard deviation of the per-frame interval, as a fraction of the
    /// nominal interval.
    pub jitter: f32,
    /// Chance per frame that tracking drops out for that frame.
    pub dropout: f64,
    /// Random seed.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            blend_shape_count: 52,
            rate_hz: 60.0,
            jitter: 0.1,
            dropout: 0.0,
            seed: 42,
        }
    }
}

/// Per-channel oscillator.
#[derive(Debug, Clone, Copy)]
struct Channel {
    frequency: f32,
    phase: f32,
    amplitude: f32,
}

/// Deterministic synthetic tracking source.
pub struct SyntheticFace {
    rng: StdRng,
    config: SyntheticConfig,
    channels: Vec<Channel>,
    sigma: f32,
    time: f32,
    frame: i32,
}

impl SyntheticFace {
    pub fn new(config: SyntheticConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let channels = (0..config.blend_shape_count)
            .map(|_| Channel {
                frequency: rng.gen_range(0.2..2.0),
                phase: rng.gen_range(0.0..std::f32::consts::TAU),
                amplitude: rng.gen_range(0.1..0.5),
            })
            .collect();
        let sigma = if config.jitter.is_finite() {
            config.jitter.max(0.0)
        } else {
            0.0
        };

        Self {
            rng,
            config,
            channels,
            sigma,
            time: 0.0,
            frame: 0,
        }
    }

    /// Timestamp of the most recently produced sample.
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Fill `out` with the next sample and return the interval since the
    /// previous one, in seconds.
    pub fn next_sample(&mut self, out: &mut FaceSample) -> f32 {
        let nominal = 1.0 / self.config.rate_hz.max(1.0);
        let dt = if self.frame == 0 {
            0.0
        } else {
            let noise: f32 = self.rng.sample::<f32, _>(StandardNormal) * self.sigma;
            (nominal * (1.0 + noise)).max(nominal * 0.1)
        };
        self.time += dt;
        let t = self.time;

        out.blend_shapes.resize(self.channels.len(), 0.0);
        for (weight, channel) in out.blend_shapes.iter_mut().zip(&self.channels) {
            let wave = (t * channel.frequency * std::f32::consts::TAU + channel.phase).sin();
            *weight = (0.5 + channel.amplitude * wave).clamp(0.0, 1.0);
        }

        let yaw = 0.35 * (t * 0.5).sin();
        let pitch = 0.15 * (t * 0.8).sin();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        // yaw about Y composed with pitch about X
        out.head = Pose::new(
            [0.02 * (t * 0.3).sin(), 0.01 * (t * 0.7).sin(), -0.4],
            [sp * cy, cp * sy, -sp * sy, cp * cy],
        );
        out.camera = Pose::IDENTITY;
        out.frame_number = self.frame;
        out.frame_time = t;
        out.tracking_active = !self.rng.gen_bool(self.config.dropout.clamp(0.0, 1.0));

        self.frame += 1;
        dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_for_seed() {
        let config = SyntheticConfig {
            blend_shape_count: 8,
            ..Default::default()
        };
        let mut a = SyntheticFace::new(config.clone());
        let mut b = SyntheticFace::new(config);
        let mut sa = FaceSample::new(8);
        let mut sb = FaceSample::new(8);
        for _ in 0..20 {
            a.next_sample(&mut sa);
            b.next_sample(&mut sb);
            assert_eq!(sa, sb);
        }
    }

    #[test]
    fn test_weights_in_range_and_time_increases() {
        let mut face = SyntheticFace::new(SyntheticConfig {
            blend_shape_count: 16,
            jitter: 0.5,
            ..Default::default()
        });
        let mut sample = FaceSample::new(0);
        let mut last_time = -1.0;
        for i in 0..200 {
            face.next_sample(&mut sample);
            assert_eq!(sample.blend_shapes.len(), 16);
            assert!(sample.blend_shapes.iter().all(|w| (0.0..=1.0).contains(w)));
            assert_eq!(sample.frame_number, i);
            assert!(sample.frame_time > last_time);
            last_time = sample.frame_time;

            let norm: f32 = sample.head.rotation.iter().map(|c| c * c).sum();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }
}
