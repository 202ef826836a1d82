//! Timecode decoding
//!
//! Turns the stereo signal captured from a control record into needle
//! position, signed speed and a confidence figure.
//!
//! ## Signal model
//!
//! The record carries two sine carriers in quadrature. Which one leads tells
//! the direction of travel; the rate of zero crossings tells the speed. The
//! amplitude of the primary carrier at each cycle encodes one bit of an LFSR
//! sequence, so the last `bits` bits identify the absolute cycle.
//!
//! ```text
//!  input ──► zero tracking ──► crossings ──┬──► direction ──┐
//!                                          ├──► PitchFilter ┼──► DecoderReading
//!                                          └──► bit read ───┘
//!                                               correlate vs LFSR, score
//! ```
//!
//! ## Tolerance
//!
//! Every bit read is checked against the register predicted from the
//! previous ones. Agreement raises a confidence score; a mismatch while
//! well locked costs a penalty but the prediction is kept, so isolated bit
//! errors from scratching do not drop the lock. A position is reported only
//! above `VALID_BITS` of confidence, inside the lookup table, and short of
//! the definition's safe limit.
//!
//! [`TimecodeDecoder`] is immutable configuration and may be copied freely;
//! all per-deck history lives in [`DecoderState`].

pub mod definition;
pub mod monitor;
pub mod pitch;

#[cfg(test)]
pub(crate) mod testsignal;

pub use definition::{Lookup, TimecodeDefinition, DEFAULT_TIMECODE};
pub use monitor::{MonitorTap, DEFAULT_MONITOR_SIZE};
pub use pitch::PitchFilter;

use thiserror::Error;

use crate::types::StereoSample;

/// Time constant of the zero-level tracker, in seconds
const ZERO_RC: f64 = 0.001;

/// Crossing hysteresis, 128 on a 16-bit scale
const ZERO_THRESHOLD: f64 = 128.0 / 32768.0;

/// Smoothing of the bit decision level, in bit reads
const REF_PEAKS_AVG: f64 = 48.0;

/// Confidence needed before a position is reported
const VALID_BITS: u32 = 24;

/// Confidence ceiling
const MAX_VALID_BITS: u32 = 128;

/// Confidence lost on a mismatched bit while locked
const MISMATCH_PENALTY: u32 = 16;

/// Time without a bit read after which the position is stale
const DROPOUT_SECONDS: f64 = 0.25;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimecodeError {
    #[error("Unknown timecode definition: {0}")]
    UnknownDefinition(String),
}

/// Zero-crossing detector for one carrier
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Channel {
    zero: f64,
    positive: bool,
    swapped: bool,
}

impl Channel {
    #[inline]
    fn detect(&mut self, value: f64, alpha: f64) {
        self.swapped = false;
        if value > self.zero + ZERO_THRESHOLD && !self.positive {
            self.swapped = true;
            self.positive = true;
        } else if value < self.zero - ZERO_THRESHOLD && self.positive {
            self.swapped = true;
            self.positive = false;
        }
        self.zero += alpha * (value - self.zero);
    }
}

/// Per-deck decoding history
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderState {
    primary: Channel,
    secondary: Channel,
    forwards: bool,
    pitch: PitchFilter,
    /// Bits as read from the record
    bitstream: u32,
    /// Register predicted from the previous reads
    timecode: u32,
    valid_counter: u32,
    ref_level: f64,
    /// Samples since the last bit read
    timecode_ticker: u32,
    monitor_counter: u32,
}

impl DecoderState {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            primary: Channel::default(),
            secondary: Channel::default(),
            forwards: true,
            pitch: PitchFilter::new(1.0 / sample_rate.max(1) as f64),
            bitstream: 0,
            timecode: 0,
            valid_counter: 0,
            ref_level: 0.0,
            timecode_ticker: 0,
            monitor_counter: 0,
        }
    }

    /// Smoothed signed speed, 1.0 being nominal
    pub fn speed(&self) -> f64 {
        self.pitch.current()
    }

    pub fn is_forwards(&self) -> bool {
        self.forwards
    }

    pub fn confidence(&self) -> f32 {
        self.valid_counter.min(MAX_VALID_BITS) as f32 / MAX_VALID_BITS as f32
    }
}

/// One decoded estimate, taken at the end of a block
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecoderReading {
    /// Record position in seconds when the last bit was read
    pub position: Option<f64>,
    /// Seconds elapsed since that bit was read
    pub when: f64,
    /// Signed speed, 1.0 being nominal
    pub speed: f64,
    /// 0.0..=1.0
    pub confidence: f32,
}

impl DecoderReading {
    pub fn is_resolved(&self) -> bool {
        self.position.is_some()
    }

    /// Best estimate of the needle position right now, in seconds
    pub fn target(&self) -> Option<f64> {
        self.position.map(|position| position + self.speed * self.when)
    }
}

/// Decoding engine bound to one definition and sample rate
#[derive(Debug, Clone, Copy)]
pub struct TimecodeDecoder {
    definition: &'static TimecodeDefinition,
    lookup: &'static Lookup,
    sample_rate: u32,
    dt: f64,
    zero_alpha: f64,
    dropout_ticks: u32,
}

impl TimecodeDecoder {
    /// Create a decoder, building the definition's lookup if needed
    pub fn new(definition: &'static TimecodeDefinition, sample_rate: u32) -> Self {
        let dt = 1.0 / sample_rate.max(1) as f64;
        Self {
            definition,
            lookup: definition.lookup(),
            sample_rate,
            dt,
            zero_alpha: dt / (ZERO_RC + dt),
            dropout_ticks: (DROPOUT_SECONDS * sample_rate as f64) as u32,
        }
    }

    pub fn by_name(name: &str, sample_rate: u32) -> Result<Self, TimecodeError> {
        TimecodeDefinition::find(name)
            .map(|definition| Self::new(definition, sample_rate))
            .ok_or_else(|| TimecodeError::UnknownDefinition(name.to_string()))
    }

    pub fn definition(&self) -> &'static TimecodeDefinition {
        self.definition
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Fresh state for this decoder
    pub fn new_state(&self) -> DecoderState {
        DecoderState::new(self.sample_rate)
    }

    /// Decode one block of input
    ///
    /// Allocation-free. Silence or garbage simply never builds confidence.
    pub fn process(
        &self,
        state: &mut DecoderState,
        input: &[StereoSample],
        monitor: Option<&MonitorTap>,
    ) {
        for frame in input {
            let (primary, secondary) = if self.definition.switch_primary {
                (frame.left as f64, frame.right as f64)
            } else {
                (frame.right as f64, frame.left as f64)
            };

            self.process_sample(state, primary, secondary);

            if let Some(tap) = monitor {
                self.update_monitor(state, tap, primary, secondary);
            }
        }
    }

    #[inline]
    fn process_sample(&self, state: &mut DecoderState, primary: f64, secondary: f64) {
        state.primary.detect(primary, self.zero_alpha);
        state.secondary.detect(secondary, self.zero_alpha);

        if state.primary.swapped || state.secondary.swapped {
            let mut forwards = if state.primary.swapped {
                state.primary.positive != state.secondary.positive
            } else {
                state.primary.positive == state.secondary.positive
            };
            if self.definition.switch_phase {
                forwards = !forwards;
            }

            if forwards != state.forwards {
                state.forwards = forwards;
                self.change_direction(state);
            }

            let quarter_cycle = 1.0 / (4.0 * self.definition.resolution as f64);
            state
                .pitch
                .observe(if state.forwards { quarter_cycle } else { -quarter_cycle });
        } else {
            state.pitch.observe(0.0);
        }

        // Bits are read at the peak of the primary: where the secondary crosses
        if state.secondary.swapped && state.primary.positive != self.definition.switch_polarity {
            let magnitude = (primary - state.primary.zero).abs();
            self.read_bit(state, magnitude);
        }

        state.timecode_ticker = state.timecode_ticker.saturating_add(1);
        // The register still holds bits from before the lift; relock from scratch
        if state.timecode_ticker > self.dropout_ticks {
            state.valid_counter = 0;
        }
    }

    /// Realign the registers when the record changes direction
    ///
    /// The next read revisits the cycle just read, so a locked register is
    /// walked a full `bits` steps to line up with the new direction.
    fn change_direction(&self, state: &mut DecoderState) {
        if state.valid_counter < VALID_BITS {
            state.valid_counter = 0;
            return;
        }

        let def = self.definition;
        let mut code = state.timecode;
        for _ in 0..def.bits {
            code = if state.forwards {
                def.reverse(code)
            } else {
                def.forward(code)
            };
        }
        state.timecode = code;
        state.bitstream = code;
    }

    fn read_bit(&self, state: &mut DecoderState, magnitude: f64) {
        let def = self.definition;
        let bit = (magnitude > state.ref_level) as u32;

        if state.forwards {
            state.timecode = def.forward(state.timecode);
            state.bitstream = (state.bitstream >> 1) | (bit << (def.bits - 1));
        } else {
            state.timecode = def.reverse(state.timecode);
            state.bitstream = ((state.bitstream << 1) & def.mask()) | bit;
        }

        if state.timecode == state.bitstream {
            state.valid_counter = (state.valid_counter + 1).min(MAX_VALID_BITS);
        } else if state.valid_counter >= VALID_BITS + MISMATCH_PENALTY {
            state.valid_counter -= MISMATCH_PENALTY;
            state.bitstream = state.timecode;
        } else {
            state.timecode = state.bitstream;
            state.valid_counter = 0;
        }

        state.timecode_ticker = 0;
        state.ref_level += (magnitude - state.ref_level) / REF_PEAKS_AVG;
    }

    fn update_monitor(&self, state: &mut DecoderState, tap: &MonitorTap, primary: f64, secondary: f64) {
        state.monitor_counter += 1;
        if state.monitor_counter >= monitor::DECAY_EVERY {
            state.monitor_counter = 0;
            tap.decay();
        }

        if state.ref_level > 0.0 {
            let scale = 2.0 * state.ref_level;
            tap.plot(
                (primary - state.primary.zero) / scale,
                (secondary - state.secondary.zero) / scale,
            );
        }
    }

    /// Absolute cycle under the needle, if resolved
    pub fn position_cycles(&self, state: &DecoderState) -> Option<u32> {
        if state.valid_counter < VALID_BITS || state.timecode_ticker > self.dropout_ticks {
            return None;
        }

        let index = self.lookup.position(state.bitstream)?;
        let position = if state.forwards {
            index + self.definition.bits - 1
        } else {
            index
        };

        // Past the usable part of the record, or wrapped
        (position < self.definition.safe).then_some(position)
    }

    /// Snapshot the state as a reading for the player
    pub fn reading(&self, state: &DecoderState) -> DecoderReading {
        DecoderReading {
            position: self
                .position_cycles(state)
                .map(|cycles| cycles as f64 / self.definition.resolution as f64),
            when: state.timecode_ticker as f64 * self.dt,
            speed: state.speed(),
            confidence: state.confidence(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testsignal::{noise, TestSignal};
    use super::*;

    const RATE: u32 = 44100;
    const BLOCK: usize = 256;

    fn decoder(name: &str) -> TimecodeDecoder {
        TimecodeDecoder::by_name(name, RATE).unwrap()
    }

    /// Feed `seconds` of signal at constant speed in device-sized blocks
    fn run(decoder: &TimecodeDecoder, state: &mut DecoderState, signal: &mut TestSignal, speed: f64, seconds: f64) {
        let mut remaining = (seconds * RATE as f64) as usize;
        while remaining > 0 {
            let frames = remaining.min(BLOCK);
            let block = signal.render(speed, frames);
            decoder.process(state, &block, None);
            remaining -= frames;
        }
    }

    fn assert_tracks(decoder: &TimecodeDecoder, state: &DecoderState, signal: &TestSignal) {
        let reading = decoder.reading(state);
        let target = reading.target().expect("position should be resolved");
        let cycles = target * decoder.definition().resolution as f64;
        assert!(
            (cycles - signal.phase()).abs() <= 2.0,
            "decoded {} cycles, signal at {}",
            cycles,
            signal.phase()
        );
    }

    #[test]
    fn test_unknown_definition() {
        let err = TimecodeDecoder::by_name("shellac_78", RATE).unwrap_err();
        assert_eq!(err, TimecodeError::UnknownDefinition("shellac_78".to_string()));
    }

    #[test]
    fn test_resolves_forward_play() {
        let decoder = decoder("serato_2a");
        let mut state = decoder.new_state();
        let mut signal = TestSignal::new(decoder.definition(), RATE, 5000.0);

        run(&decoder, &mut state, &mut signal, 1.0, 1.0);

        assert_tracks(&decoder, &state, &signal);
        let reading = decoder.reading(&state);
        assert!((reading.speed - 1.0).abs() < 0.02, "speed {}", reading.speed);
        assert!(reading.confidence > 0.5);
        assert!(state.is_forwards());
    }

    #[test]
    fn test_follows_reversal() {
        let decoder = decoder("serato_2a");
        let mut state = decoder.new_state();
        let mut signal = TestSignal::new(decoder.definition(), RATE, 5000.0);

        run(&decoder, &mut state, &mut signal, 1.0, 1.0);
        run(&decoder, &mut state, &mut signal, -1.0, 0.5);

        assert_tracks(&decoder, &state, &signal);
        let reading = decoder.reading(&state);
        assert!(reading.speed < 0.0);
        assert!((reading.speed + 1.0).abs() < 0.02, "speed {}", reading.speed);
        assert!(!state.is_forwards());
    }

    #[test]
    fn test_scratch_keeps_lock() {
        let decoder = decoder("serato_2a");
        let mut state = decoder.new_state();
        let mut signal = TestSignal::new(decoder.definition(), RATE, 20000.0);
        run(&decoder, &mut state, &mut signal, 1.0, 1.0);

        // 3 Hz back-and-forth, peaking at 1.5x
        let total = RATE as usize;
        let mut frame = 0usize;
        while frame < total {
            let block = signal.render_with(BLOCK, |i| {
                let t = (frame + i) as f64 / RATE as f64;
                1.5 * (2.0 * std::f64::consts::PI * 3.0 * t).cos()
            });
            decoder.process(&mut state, &block, None);
            frame += BLOCK;
        }

        run(&decoder, &mut state, &mut signal, 1.0, 0.1);
        assert_tracks(&decoder, &state, &signal);
    }

    #[test]
    fn test_cold_start_speeds() {
        for speed in [0.5, 2.0, -0.7] {
            let decoder = decoder("serato_2a");
            let mut state = decoder.new_state();
            let mut signal = TestSignal::new(decoder.definition(), RATE, 30000.0);

            run(&decoder, &mut state, &mut signal, speed, 1.5);

            assert_tracks(&decoder, &state, &signal);
            let reading = decoder.reading(&state);
            assert!((reading.speed - speed).abs() < 0.02, "speed {} vs {}", reading.speed, speed);
        }
    }

    #[test]
    fn test_switched_definitions() {
        for name in ["mixvibes_v2", "traktor_a"] {
            let decoder = decoder(name);
            let mut state = decoder.new_state();
            let mut signal = TestSignal::new(decoder.definition(), RATE, 10000.0);

            run(&decoder, &mut state, &mut signal, 1.0, 1.0);
            assert_tracks(&decoder, &state, &signal);

            run(&decoder, &mut state, &mut signal, -1.0, 0.5);
            assert_tracks(&decoder, &state, &signal);
            assert!(decoder.reading(&state).speed < 0.0);
        }
    }

    #[test]
    fn test_noise_never_resolves() {
        let decoder = decoder("serato_2a");
        let mut state = decoder.new_state();
        let signal = noise(RATE as usize * 3, 0x5eed);

        for block in signal.chunks(BLOCK) {
            decoder.process(&mut state, block, None);
            assert!(!decoder.reading(&state).is_resolved());
        }
    }

    #[test]
    fn test_silence_is_unresolved_and_still() {
        let decoder = decoder("serato_2a");
        let mut state = decoder.new_state();
        let silence = vec![StereoSample::silence(); RATE as usize];

        decoder.process(&mut state, &silence, None);

        let reading = decoder.reading(&state);
        assert_eq!(reading.position, None);
        assert_eq!(reading.speed, 0.0);
        assert_eq!(reading.confidence, 0.0);
    }

    #[test]
    fn test_dropout_unresolves_then_relocks() {
        let decoder = decoder("serato_2a");
        let mut state = decoder.new_state();
        let mut signal = TestSignal::new(decoder.definition(), RATE, 5000.0);
        run(&decoder, &mut state, &mut signal, 1.0, 1.0);
        assert!(decoder.reading(&state).is_resolved());

        // Needle lifted
        let silence = vec![StereoSample::silence(); RATE as usize / 2];
        decoder.process(&mut state, &silence, None);
        assert!(!decoder.reading(&state).is_resolved());

        // Dropped somewhere else on the record
        let mut signal = TestSignal::new(decoder.definition(), RATE, 50000.0);
        run(&decoder, &mut state, &mut signal, 1.0, 0.2);
        assert_tracks(&decoder, &state, &signal);
    }

    #[test]
    fn test_needle_drop_never_reports_old_position() {
        let decoder = decoder("serato_2a");
        for start in [5000.0, 40_000.0, 77_777.0, 120_000.0, 150_500.0, 210_000.0, 333_000.0, 400_001.0] {
            let mut state = decoder.new_state();
            let mut signal = TestSignal::new(decoder.definition(), RATE, start);
            run(&decoder, &mut state, &mut signal, 1.0, 0.5);
            assert!(decoder.reading(&state).is_resolved());

            let silence = vec![StereoSample::silence(); RATE as usize / 2];
            decoder.process(&mut state, &silence, None);
            assert_eq!(decoder.reading(&state).confidence, 0.0);

            // One frame at a time, so a stale lock cannot hide inside a block
            let mut signal = TestSignal::new(decoder.definition(), RATE, start + 200_000.0);
            let mut resolved = 0;
            for _ in 0..RATE / 5 {
                let frame = signal.render(1.0, 1);
                decoder.process(&mut state, &frame, None);
                if let Some(target) = decoder.reading(&state).target() {
                    let cycles = target * decoder.definition().resolution as f64;
                    assert!(
                        (cycles - signal.phase()).abs() <= 3.0,
                        "from {}: resolved {:.0} with the needle at {:.0}",
                        start,
                        cycles,
                        signal.phase()
                    );
                    resolved += 1;
                }
            }
            assert!(resolved > 0, "from {}: never relocked", start);
        }
    }

    #[test]
    fn test_past_safe_limit_is_unresolved() {
        let decoder = decoder("mixvibes_7inch");
        let def = decoder.definition();
        let mut state = decoder.new_state();
        let mut signal = TestSignal::new(def, RATE, def.safe as f64 + 1000.0);

        run(&decoder, &mut state, &mut signal, 1.0, 1.0);
        assert!(!decoder.reading(&state).is_resolved());
    }

    #[test]
    fn test_monitor_draws_signal() {
        let decoder = decoder("serato_2a");
        let mut state = decoder.new_state();
        let tap = MonitorTap::new(64);
        let mut signal = TestSignal::new(decoder.definition(), RATE, 1000.0);

        let block = signal.render(1.0, 4096);
        decoder.process(&mut state, &block, Some(&tap));
        assert!(tap.coverage() > 0.0);
    }
}
