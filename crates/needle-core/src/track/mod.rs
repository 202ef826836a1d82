//! Tracks: decoded PCM held in memory for realtime playback
//!
//! A `Track` is produced by an [`Importer`](import::Importer) off the audio
//! thread and then shared with the player through `basedrop::Shared`, so
//! dropping the last reference on the audio thread never frees memory there.
//!
//! Alongside the PCM, a track carries two peak meters for display (a fine
//! PPM strip and a coarse overview) and the beat calibration, which is the
//! only part that changes after import.

pub mod import;

use std::sync::atomic::{AtomicU64, Ordering};

use basedrop::Shared;

use crate::engine::gc::gc_handle;
use crate::types::StereoSample;

/// Frames per PPM meter bucket
pub const PPM_RESOLUTION: usize = 64;

/// Frames per overview bucket
pub const OVERVIEW_RESOLUTION: usize = 2048;

pub struct Track {
    origin: String,
    rate: u32,
    samples: Vec<StereoSample>,
    ppm: Vec<u8>,
    overview: Vec<u8>,
    /// f64 bits, in samples; 0.0 = uncalibrated
    beat_interval: AtomicU64,
    /// f64 bits, in samples
    beat_offset: AtomicU64,
}

fn peak_meter(samples: &[StereoSample], bucket: usize) -> Vec<u8> {
    samples
        .chunks(bucket)
        .map(|chunk| {
            let peak = chunk.iter().map(|s| s.peak()).fold(0.0f32, f32::max);
            (peak.min(1.0) * 255.0).round() as u8
        })
        .collect()
}

impl Track {
    pub fn new(origin: impl Into<String>, rate: u32, samples: Vec<StereoSample>) -> Self {
        let ppm = peak_meter(&samples, PPM_RESOLUTION);
        let overview = peak_meter(&samples, OVERVIEW_RESOLUTION);
        Self {
            origin: origin.into(),
            rate,
            samples,
            ppm,
            overview,
            beat_interval: AtomicU64::new(0f64.to_bits()),
            beat_offset: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Build from interleaved signed 16-bit stereo
    pub fn from_i16_interleaved(origin: impl Into<String>, rate: u32, pcm: &[i16]) -> Self {
        let samples = pcm
            .chunks_exact(2)
            .map(|frame| StereoSample::from_i16(frame[0], frame[1]))
            .collect();
        Self::new(origin, rate, samples)
    }

    /// Wrap for sharing with the audio thread
    pub fn into_shared(self) -> Shared<Track> {
        Shared::new(&gc_handle(), self)
    }

    /// Path or label the track was loaded from
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Length in frames
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.rate.max(1) as f64
    }

    #[inline]
    pub fn samples(&self) -> &[StereoSample] {
        &self.samples
    }

    pub fn ppm(&self) -> &[u8] {
        &self.ppm
    }

    pub fn overview(&self) -> &[u8] {
        &self.overview
    }

    /// Beat length in samples, if calibrated
    pub fn beat_interval(&self) -> Option<f64> {
        let interval = f64::from_bits(self.beat_interval.load(Ordering::Relaxed));
        (interval > 0.0).then_some(interval)
    }

    /// Sample position of a reference beat
    pub fn beat_offset(&self) -> f64 {
        f64::from_bits(self.beat_offset.load(Ordering::Relaxed))
    }

    pub fn set_beat(&self, interval: f64, offset: f64) {
        self.beat_interval.store(interval.to_bits(), Ordering::Relaxed);
        self.beat_offset.store(offset.to_bits(), Ordering::Relaxed);
    }

    pub fn bpm(&self) -> Option<f64> {
        self.beat_interval()
            .map(|interval| 60.0 * self.rate as f64 / interval)
    }

    /// Set the tempo directly, keeping the beat offset
    pub fn set_bpm(&self, bpm: f64) -> bool {
        if !(bpm.is_finite() && bpm > 0.0) {
            return false;
        }
        let interval = 60.0 * self.rate as f64 / bpm;
        self.beat_interval.store(interval.to_bits(), Ordering::Relaxed);
        true
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("origin", &self.origin)
            .field("rate", &self.rate)
            .field("frames", &self.samples.len())
            .finish()
    }
}
