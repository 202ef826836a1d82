//! Synthetic control-record signal for tests

use super::TimecodeDefinition;
use crate::types::StereoSample;

const LEVEL: f64 = 0.5;
const ZERO_BIT_LEVEL: f64 = 0.6;

/// Phase-continuous quadrature carrier encoding a definition's bit sequence
pub(crate) struct TestSignal {
    def: &'static TimecodeDefinition,
    rate: f64,
    phase: f64,
    bits: Vec<bool>,
}

impl TestSignal {
    /// Start with the needle at `start_cycle`
    pub fn new(def: &'static TimecodeDefinition, rate: u32, start_cycle: f64) -> Self {
        let mut bits = Vec::with_capacity(def.length as usize);
        let mut code = def.seed;
        for _ in 0..def.length {
            bits.push(code & 1 == 1);
            code = def.forward(code);
        }
        Self {
            def,
            rate: rate as f64,
            phase: start_cycle,
            bits,
        }
    }

    /// Current needle position in cycles
    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn render(&mut self, speed: f64, frames: usize) -> Vec<StereoSample> {
        self.render_with(frames, |_| speed)
    }

    /// Render with a per-frame speed
    pub fn render_with(&mut self, frames: usize, mut speed_at: impl FnMut(usize) -> f64) -> Vec<StereoSample> {
        let primary_sign = if self.def.switch_polarity { -1.0 } else { 1.0 };
        let secondary_sign = if self.def.switch_phase != self.def.switch_polarity {
            -1.0
        } else {
            1.0
        };

        (0..frames)
            .map(|i| {
                let cycle = (self.phase + 0.5).floor();
                let set = cycle >= 0.0 && self.bits.get(cycle as usize).copied().unwrap_or(false);
                let amplitude = LEVEL * if set { 1.0 } else { ZERO_BIT_LEVEL };

                let theta = 2.0 * std::f64::consts::PI * self.phase;
                let primary = (primary_sign * amplitude * theta.cos()) as f32;
                let secondary = (secondary_sign * amplitude * theta.sin()) as f32;

                self.phase += speed_at(i) * self.def.resolution as f64 / self.rate;

                if self.def.switch_primary {
                    StereoSample::new(primary, secondary)
                } else {
                    StereoSample::new(secondary, primary)
                }
            })
            .collect()
    }
}

/// Deterministic white noise
pub(crate) fn noise(frames: usize, seed: u64) -> Vec<StereoSample> {
    let mut state = seed.max(1);
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        ((state >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) as f32
    };
    (0..frames)
        .map(|_| {
            let left = next();
            let right = next();
            StereoSample::new(left, right)
        })
        .collect()
}
