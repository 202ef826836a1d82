//! Realtime track playback
//!
//! The player keeps a fractional read position into the loaded track and
//! advances it once per output frame by the current pitch. The pitch comes
//! from one of two places:
//!
//! - **Internal**: a manual pitch set by the operator. Applied exactly, so a
//!   pitch of 1.0 at matching rates advances one source frame per output
//!   frame.
//! - **Timecode**: the record speed from the decoder, plus a small
//!   correction that pulls the track back into line with the needle. The
//!   correction is smoothed over `SYNC_TIME`; a discrepancy larger than
//!   `SKIP_THRESHOLD` is a needle drop and is jumped to directly.
//!
//! In timecode mode the pitch is ramped across each block from the previous
//! value, so reversals during a scratch do not step.
//!
//! ## Position and elapsed time
//!
//! The position is kept in track frames. Elapsed time is that position over
//! the track's sample rate. The record's own position is related to elapsed
//! time by `offset`, which is re-established (`recalibrate`) after every
//! seek, load or mode change so that those never cause a jump on their own.

use basedrop::Shared;

use super::resample::{read_interpolated, InterpolationMethod};
use crate::timecode::DecoderReading;
use crate::track::Track;
use crate::types::StereoSample;

/// Track/record discrepancy treated as a needle drop, in seconds
pub const SKIP_THRESHOLD: f64 = 0.125;

/// Time over which small discrepancies are corrected, in seconds
const SYNC_TIME: f64 = 0.5;

/// Smoothing of the correction pitch, per block
const SYNC_ALPHA: f64 = 1.0 / 16.0;

/// Who drives the pitch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ControlMode {
    #[default]
    Internal = 0,
    Timecode = 1,
}

impl ControlMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ControlMode::Timecode,
            _ => ControlMode::Internal,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlMode::Internal => "internal",
            ControlMode::Timecode => "timecode",
        }
    }
}

/// Externally visible player state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSnapshot {
    /// Fractional read position in track frames
    pub position: f64,
    /// Seconds of track time
    pub elapsed: f64,
    /// Manual pitch
    pub pitch: f64,
    pub mode: ControlMode,
    pub has_track: bool,
}

#[derive(Clone)]
pub struct Player {
    sample_rate: u32,
    track: Option<Shared<Track>>,
    position: f64,
    pitch: f64,
    /// Pitch applied at the end of the last block
    effective_pitch: f64,
    sync_pitch: f64,
    mode: ControlMode,
    recalibrate: bool,
    /// Record seconds minus track seconds
    offset: f64,
    interpolation: InterpolationMethod,
}

impl Player {
    pub fn new(sample_rate: u32, interpolation: InterpolationMethod) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            track: None,
            position: 0.0,
            pitch: 0.0,
            effective_pitch: 0.0,
            sync_pitch: 0.0,
            mode: ControlMode::Internal,
            recalibrate: true,
            offset: 0.0,
            interpolation,
        }
    }

    pub fn track(&self) -> Option<&Shared<Track>> {
        self.track.as_ref()
    }

    pub fn has_track(&self) -> bool {
        self.track.is_some()
    }

    /// Install a track, returning the previous one
    ///
    /// Playback restarts from the top; the record is re-anchored on the
    /// next resolved reading.
    pub fn set_track(&mut self, track: Option<Shared<Track>>) -> Option<Shared<Track>> {
        self.position = 0.0;
        self.sync_pitch = 0.0;
        self.recalibrate = true;
        std::mem::replace(&mut self.track, track)
    }

    /// Read position in track frames
    pub fn get_position(&self) -> f64 {
        self.position
    }

    /// Seconds of track time
    pub fn get_elapsed(&self) -> f64 {
        match &self.track {
            Some(track) => self.position / track.rate().max(1) as f64,
            None => 0.0,
        }
    }

    /// Jump to `seconds`, clamped to the track
    pub fn seek_to(&mut self, seconds: f64) {
        self.position = match &self.track {
            Some(track) if seconds.is_finite() => {
                let last = track.len().saturating_sub(1) as f64;
                (seconds * track.rate() as f64).clamp(0.0, last)
            }
            _ => 0.0,
        };
        self.sync_pitch = 0.0;
        self.recalibrate = true;
    }

    pub fn recue(&mut self) {
        self.seek_to(0.0);
    }

    /// Manual pitch, used in internal mode
    pub fn set_pitch(&mut self, pitch: f64) {
        if pitch.is_finite() {
            self.pitch = pitch;
        }
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    /// Pitch applied at the end of the last block
    pub fn effective_pitch(&self) -> f64 {
        self.effective_pitch
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ControlMode) {
        if mode == self.mode {
            return;
        }
        match mode {
            ControlMode::Internal => {
                // Carry on at whatever speed the record was going
                self.pitch = self.effective_pitch;
            }
            ControlMode::Timecode => {
                self.recalibrate = true;
            }
        }
        self.sync_pitch = 0.0;
        self.mode = mode;
    }

    pub fn toggle_control_mode(&mut self) {
        self.set_mode(match self.mode {
            ControlMode::Internal => ControlMode::Timecode,
            ControlMode::Timecode => ControlMode::Internal,
        });
    }

    pub fn interpolation(&self) -> InterpolationMethod {
        self.interpolation
    }

    /// Re-anchor the record on the next resolved reading
    pub(crate) fn mark_recalibrate(&mut self) {
        self.recalibrate = true;
        self.sync_pitch = 0.0;
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            position: self.position,
            elapsed: self.get_elapsed(),
            pitch: self.pitch,
            mode: self.mode,
            has_track: self.has_track(),
        }
    }

    fn set_elapsed(&mut self, seconds: f64, rate: u32) {
        self.position = seconds * rate as f64;
    }

    /// Pitch needed to follow the record, 0.0 when the needle is lost
    fn follow(&mut self, reading: Option<&DecoderReading>, rate: u32) -> Option<f64> {
        let reading = reading?;
        let target = reading.target()?;
        let elapsed = self.position / rate as f64;

        if self.recalibrate {
            self.offset = target - elapsed;
            self.recalibrate = false;
            self.sync_pitch = 0.0;
        } else {
            let diff = elapsed - (target - self.offset);
            if diff.abs() > SKIP_THRESHOLD {
                self.set_elapsed(target - self.offset, rate);
                self.sync_pitch = 0.0;
            } else {
                self.sync_pitch += (-diff / SYNC_TIME - self.sync_pitch) * SYNC_ALPHA;
            }
        }

        Some(reading.speed + self.sync_pitch)
    }

    /// Render one block
    ///
    /// `reading` is the decoder's view of the record after this block's
    /// input; it is ignored in internal mode. Allocation-free.
    pub fn process_block(&mut self, reading: Option<&DecoderReading>, output: &mut [StereoSample]) {
        let Some(track) = self.track.clone() else {
            output.fill(StereoSample::silence());
            return;
        };
        if output.is_empty() {
            return;
        }

        let rate = track.rate().max(1);
        let (start, end) = match self.mode {
            ControlMode::Internal => (self.pitch, self.pitch),
            ControlMode::Timecode => match self.follow(reading, rate) {
                Some(pitch) => (self.effective_pitch, pitch),
                None => {
                    self.sync_pitch = 0.0;
                    (0.0, 0.0)
                }
            },
        };

        let ratio = rate as f64 / self.sample_rate as f64;
        let step = (end - start) / output.len() as f64;
        let samples = track.samples();

        for (i, frame) in output.iter_mut().enumerate() {
            *frame = read_interpolated(samples, self.position, self.interpolation);
            let pitch = start + step * (i + 1) as f64;
            self.position += pitch * ratio;
        }

        self.effective_pitch = end;
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("track", &self.track.as_deref())
            .field("position", &self.position)
            .field("pitch", &self.pitch)
            .field("effective_pitch", &self.effective_pitch)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 44100;

    fn ramp_track(frames: usize, rate: u32) -> Shared<Track> {
        let samples = (0..frames)
            .map(|i| {
                let v = (i % 1000) as f32 / 1000.0;
                StereoSample::new(v, -v)
            })
            .collect();
        Track::new("ramp", rate, samples).into_shared()
    }

    fn loaded(frames: usize) -> Player {
        let mut player = Player::new(RATE, InterpolationMethod::Linear);
        player.set_track(Some(ramp_track(frames, RATE)));
        player
    }

    fn reading(position: f64, speed: f64) -> DecoderReading {
        DecoderReading {
            position: Some(position),
            when: 0.0,
            speed,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_no_track_is_silent() {
        let mut player = Player::new(RATE, InterpolationMethod::Cubic);
        player.set_pitch(1.0);
        let mut out = vec![StereoSample::new(1.0, 1.0); 64];

        player.process_block(None, &mut out);

        assert!(out.iter().all(|s| *s == StereoSample::silence()));
        assert_eq!(player.get_elapsed(), 0.0);
        player.seek_to(3.0);
        assert_eq!(player.get_position(), 0.0);
    }

    #[test]
    fn test_recue_seek_and_play_scenario() {
        let mut player = loaded(100_000);
        player.set_pitch(1.0);

        player.recue();
        assert_eq!(player.get_elapsed(), 0.0);

        player.seek_to(1.0);
        assert_eq!(player.get_elapsed(), 1.0);

        let mut out = vec![StereoSample::silence(); 441];
        player.process_block(None, &mut out);
        assert!((player.get_elapsed() - 1.01).abs() < 1e-12);
    }

    #[test]
    fn test_unit_pitch_advances_exactly() {
        let mut player = loaded(100_000);
        player.set_pitch(1.0);

        for n in [0usize, 1, 7, 256, 1000, 4096] {
            let before = player.get_position();
            let mut out = vec![StereoSample::silence(); n];
            player.process_block(None, &mut out);
            assert_eq!(player.get_position() - before, n as f64);
        }
    }

    #[test]
    fn test_seek_clamps_without_drift() {
        let mut player = loaded(100_000);
        for t in [0.0, 0.25, 0.5, 1.0, 2.0] {
            player.seek_to(t);
            assert!((player.get_elapsed() - t).abs() < 1e-12);
        }

        player.seek_to(-5.0);
        assert_eq!(player.get_elapsed(), 0.0);
        player.seek_to(f64::NAN);
        assert_eq!(player.get_elapsed(), 0.0);
        player.seek_to(1000.0);
        assert_eq!(player.get_position(), 99_999.0);
    }

    #[test]
    fn test_reads_track_audio() {
        let mut player = loaded(2000);
        player.set_pitch(1.0);
        player.seek_to(100.0 / RATE as f64);

        let mut out = vec![StereoSample::silence(); 4];
        player.process_block(None, &mut out);
        assert_eq!(out[0], StereoSample::new(0.1, -0.1));
        assert_eq!(out[3], StereoSample::new(0.103, -0.103));
    }

    #[test]
    fn test_runs_off_end_into_silence() {
        let mut player = loaded(1000);
        player.set_pitch(1.0);
        player.seek_to(990.0 / RATE as f64);

        let mut out = vec![StereoSample::new(1.0, 1.0); 32];
        player.process_block(None, &mut out);
        assert!(out[..10].iter().any(|s| s.left != 0.0));
        assert!(out[10..].iter().all(|s| *s == StereoSample::silence()));
    }

    #[test]
    fn test_reverse_pitch() {
        let mut player = loaded(10_000);
        player.seek_to(5000.0 / RATE as f64);
        player.set_pitch(-2.0);

        let mut out = vec![StereoSample::silence(); 100];
        player.process_block(None, &mut out);
        assert_eq!(player.get_position(), 4800.0);
    }

    #[test]
    fn test_track_rate_differs_from_device() {
        let mut player = Player::new(RATE, InterpolationMethod::Linear);
        player.set_track(Some(ramp_track(10_000, 22050)));
        player.set_pitch(1.0);

        let mut out = vec![StereoSample::silence(); 441];
        player.process_block(None, &mut out);
        assert!((player.get_position() - 220.5).abs() < 1e-9);
        assert!((player.get_elapsed() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_timecode_ignores_manual_pitch_and_freezes_unresolved() {
        let mut player = loaded(100_000);
        player.seek_to(1.0);
        player.set_pitch(2.0);
        player.toggle_control_mode();
        assert_eq!(player.mode(), ControlMode::Timecode);

        let before = player.get_position();
        let mut out = vec![StereoSample::silence(); 256];
        player.process_block(None, &mut out);
        player.process_block(Some(&DecoderReading::default()), &mut out);
        assert_eq!(player.get_position(), before);
        assert_eq!(player.effective_pitch(), 0.0);
    }

    #[test]
    fn test_follows_record() {
        let mut player = loaded(10 * RATE as usize);
        player.set_mode(ControlMode::Timecode);

        let n = 256;
        let mut out = vec![StereoSample::silence(); n];
        let mut target = 10.0;
        for _ in 0..200 {
            target += n as f64 / RATE as f64;
            player.process_block(Some(&reading(target, 1.0)), &mut out);
        }

        // Anchored at 10s of record = 0s of track, leading by at most a block
        let expected = target - 10.0;
        assert!((player.get_elapsed() - expected).abs() < 0.02, "{} vs {}", player.get_elapsed(), expected);
        assert!((player.effective_pitch() - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_needle_drop_jumps() {
        let mut player = loaded(20 * RATE as usize);
        player.set_mode(ControlMode::Timecode);

        let n = 256;
        let mut out = vec![StereoSample::silence(); n];
        let mut target = 10.0;
        for _ in 0..50 {
            target += n as f64 / RATE as f64;
            player.process_block(Some(&reading(target, 1.0)), &mut out);
        }

        target += 5.0;
        player.process_block(Some(&reading(target, 1.0)), &mut out);
        let expected = target - 10.0;
        assert!((player.get_elapsed() - expected).abs() < 0.02, "{} vs {}", player.get_elapsed(), expected);
    }

    #[test]
    fn test_leaving_timecode_keeps_position_and_speed() {
        let mut player = loaded(10 * RATE as usize);
        player.set_mode(ControlMode::Timecode);

        let n = 256;
        let mut out = vec![StereoSample::silence(); n];
        let mut target = 3.0;
        for _ in 0..20 {
            target += n as f64 / RATE as f64;
            player.process_block(Some(&reading(target, 1.0)), &mut out);
        }

        let position = player.get_position();
        let speed = player.effective_pitch();
        player.toggle_control_mode();

        assert_eq!(player.mode(), ControlMode::Internal);
        assert_eq!(player.get_position(), position);
        assert_eq!(player.pitch(), speed);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let mut player = loaded(100_000);
        player.set_pitch(0.5);
        player.seek_to(2.0);

        let snapshot = player.snapshot();
        assert_eq!(snapshot.elapsed, 2.0);
        assert_eq!(snapshot.position, 88_200.0);
        assert_eq!(snapshot.pitch, 0.5);
        assert_eq!(snapshot.mode, ControlMode::Internal);
        assert!(snapshot.has_track);
    }
}
