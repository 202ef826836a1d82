//! Variable-rate reading from track PCM
//!
//! The player reads the track at a fractional position that advances by the
//! current pitch each output frame. These kernels interpolate between the
//! stored frames.
//!
//! - **Linear**: 2-point, cheapest.
//! - **Cubic**: 4-point Catmull-Rom.
//! - **Sinc**: 8-tap Blackman-Harris windowed sinc.
//!
//! Reads outside the track are silent, so the edges of a track fade into
//! silence instead of wrapping or clicking.

use crate::types::StereoSample;
use serde::{Deserialize, Serialize};

/// Interpolation method for variable-speed playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Linear interpolation (2-point) - fast, acceptable quality
    Linear,
    /// Cubic Catmull-Rom interpolation (4-point) - better quality
    #[default]
    Cubic,
    /// Sinc interpolation (8-tap) - highest quality, most CPU
    Sinc,
}

impl InterpolationMethod {
    pub fn all() -> &'static [Self] {
        &[Self::Linear, Self::Cubic, Self::Sinc]
    }
}

#[inline]
fn lerp_sample(s0: StereoSample, s1: StereoSample, t: f32) -> StereoSample {
    StereoSample {
        left: s0.left + (s1.left - s0.left) * t,
        right: s0.right + (s1.right - s0.right) * t,
    }
}

/// Catmull-Rom spline through s1..s2 (tension 0.5)
#[inline]
fn cubic_interpolate(
    s0: StereoSample,
    s1: StereoSample,
    s2: StereoSample,
    s3: StereoSample,
    t: f32,
) -> StereoSample {
    let t2 = t * t;
    let t3 = t2 * t;

    let c0 = -0.5 * t3 + t2 - 0.5 * t;
    let c1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let c2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let c3 = 0.5 * t3 - 0.5 * t2;

    StereoSample {
        left: s0.left * c0 + s1.left * c1 + s2.left * c2 + s3.left * c3,
        right: s0.right * c0 + s1.right * c1 + s2.right * c2 + s3.right * c3,
    }
}

/// Sinc kernel with an 8-sample Blackman-Harris window
#[inline]
fn windowed_sinc(x: f64) -> f64 {
    if x.abs() < 1e-10 {
        return 1.0;
    }

    let sinc = (x * std::f64::consts::PI).sin() / (x * std::f64::consts::PI);

    let n = (x + 4.0) / 8.0;
    if !(0.0..=1.0).contains(&n) {
        return 0.0;
    }

    let a0 = 0.35875;
    let a1 = 0.48829;
    let a2 = 0.14128;
    let a3 = 0.01168;
    let tau = 2.0 * std::f64::consts::PI;

    let window =
        a0 - a1 * (tau * n).cos() + a2 * (2.0 * tau * n).cos() - a3 * (3.0 * tau * n).cos();

    sinc * window
}

/// `samples` cover offsets -3..=4 around the floor position
#[inline]
fn sinc_interpolate(samples: &[StereoSample; 8], t: f64) -> StereoSample {
    let mut left = 0.0f64;
    let mut right = 0.0f64;
    let mut weight_sum = 0.0f64;

    for (i, sample) in samples.iter().enumerate() {
        let weight = windowed_sinc((i as f64 - 3.0) - t);
        weight_sum += weight;
        left += sample.left as f64 * weight;
        right += sample.right as f64 * weight;
    }

    if weight_sum.abs() > 1e-10 {
        left /= weight_sum;
        right /= weight_sum;
    }

    StereoSample {
        left: left as f32,
        right: right as f32,
    }
}

#[inline]
fn get_sample(data: &[StereoSample], index: i64) -> StereoSample {
    if index < 0 || index >= data.len() as i64 {
        StereoSample::silence()
    } else {
        data[index as usize]
    }
}

/// Read a frame at a fractional position
///
/// Positions outside `[0, len)` are silent.
#[inline]
pub fn read_interpolated(
    data: &[StereoSample],
    position: f64,
    method: InterpolationMethod,
) -> StereoSample {
    if !(position >= 0.0 && position < data.len() as f64) {
        return StereoSample::silence();
    }

    let index = position.floor() as i64;
    let frac = (position - position.floor()) as f32;

    match method {
        InterpolationMethod::Linear => {
            lerp_sample(get_sample(data, index), get_sample(data, index + 1), frac)
        }
        InterpolationMethod::Cubic => cubic_interpolate(
            get_sample(data, index - 1),
            get_sample(data, index),
            get_sample(data, index + 1),
            get_sample(data, index + 2),
            frac,
        ),
        InterpolationMethod::Sinc => {
            let samples: [StereoSample; 8] =
                std::array::from_fn(|i| get_sample(data, index - 3 + i as i64));
            sinc_interpolate(&samples, frac as f64)
        }
    }
}
