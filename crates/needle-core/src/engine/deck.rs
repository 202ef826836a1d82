//! Deck - one turntable's worth of playback
//!
//! A deck binds a [`Player`], a timecode decoder with its state, a set of
//! [`CuePoints`] and the loaded [`Track`]. Every method here runs under the
//! rig lock; [`Deck::process`] is the realtime entry and is allocation-free.
//!
//! State the UI wants to draw every frame is published to [`DeckAtomics`]
//! after each block and each control operation, so readers never take the
//! lock.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use basedrop::Shared;

use super::cues::CuePoints;
use super::player::{ControlMode, Player, PlayerSnapshot};
use super::resample::InterpolationMethod;
use crate::timecode::{
    DecoderReading, DecoderState, MonitorTap, TimecodeDecoder, TimecodeDefinition,
};
use crate::track::Track;
use crate::types::StereoSample;

/// Whether a deck has something to play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DeckStatus {
    #[default]
    Empty = 0,
    Importing = 1,
    Loaded = 2,
}

impl DeckStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => DeckStatus::Importing,
            2 => DeckStatus::Loaded,
            _ => DeckStatus::Empty,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeckStatus::Empty => "empty",
            DeckStatus::Importing => "importing",
            DeckStatus::Loaded => "loaded",
        }
    }
}

/// Lock-free deck state for UI reads
///
/// Written by whoever holds the rig lock, read by anyone. Values are
/// individually consistent; a reader may see a mix of two blocks.
#[derive(Debug, Default)]
pub struct DeckAtomics {
    elapsed: AtomicU64,
    position: AtomicU64,
    pitch: AtomicU64,
    speed: AtomicU64,
    confidence: AtomicU32,
    resolved: AtomicBool,
    mode: AtomicU8,
    status: AtomicU8,
    track_len: AtomicU64,
    track_rate: AtomicU32,
    /// f64 bits, 0.0 when uncalibrated
    bpm: AtomicU64,
}

impl DeckAtomics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds of track time
    #[inline]
    pub fn elapsed(&self) -> f64 {
        f64::from_bits(self.elapsed.load(Ordering::Relaxed))
    }

    /// Read position in track frames
    #[inline]
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    /// Manual pitch
    #[inline]
    pub fn pitch(&self) -> f64 {
        f64::from_bits(self.pitch.load(Ordering::Relaxed))
    }

    /// Record speed seen by the decoder
    #[inline]
    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        f32::from_bits(self.confidence.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Relaxed)
    }

    pub fn mode(&self) -> ControlMode {
        ControlMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    pub fn status(&self) -> DeckStatus {
        DeckStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    /// Track length in frames
    pub fn track_len(&self) -> u64 {
        self.track_len.load(Ordering::Relaxed)
    }

    pub fn track_rate(&self) -> u32 {
        self.track_rate.load(Ordering::Relaxed)
    }

    pub fn bpm(&self) -> Option<f64> {
        let bpm = f64::from_bits(self.bpm.load(Ordering::Relaxed));
        (bpm > 0.0).then_some(bpm)
    }
}

/// Two-tap tempo calibration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BeatTap {
    #[default]
    AwaitingFirstTap,
    /// Track position of the first tap, in frames
    AwaitingSecondTap { first: f64 },
}

/// Work for an import thread, handed out by [`Deck::load`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub deck: usize,
    pub generation: u64,
    pub path: PathBuf,
    pub rate: u32,
}

pub struct Deck {
    index: usize,
    sample_rate: u32,
    player: Player,
    decoder: TimecodeDecoder,
    decoder_state: DecoderState,
    reading: DecoderReading,
    cues: CuePoints,
    tap: BeatTap,
    status: DeckStatus,
    generation: u64,
    atomics: Arc<DeckAtomics>,
    monitor: Arc<MonitorTap>,
}

impl Deck {
    pub fn new(
        index: usize,
        definition: &'static TimecodeDefinition,
        sample_rate: u32,
        interpolation: InterpolationMethod,
    ) -> Self {
        let decoder = TimecodeDecoder::new(definition, sample_rate);
        let deck = Self {
            index,
            sample_rate,
            player: Player::new(sample_rate, interpolation),
            decoder_state: decoder.new_state(),
            decoder,
            reading: DecoderReading::default(),
            cues: CuePoints::new(),
            tap: BeatTap::default(),
            status: DeckStatus::Empty,
            generation: 0,
            atomics: Arc::new(DeckAtomics::new()),
            monitor: Arc::new(MonitorTap::default()),
        };
        deck.publish();
        deck
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn atomics(&self) -> Arc<DeckAtomics> {
        Arc::clone(&self.atomics)
    }

    pub fn monitor(&self) -> Arc<MonitorTap> {
        Arc::clone(&self.monitor)
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn cues(&self) -> &CuePoints {
        &self.cues
    }

    pub fn decoder_state(&self) -> &DecoderState {
        &self.decoder_state
    }

    /// Decoder output from the last block
    pub fn reading(&self) -> &DecoderReading {
        &self.reading
    }

    pub fn definition(&self) -> &'static TimecodeDefinition {
        self.decoder.definition()
    }

    pub fn status(&self) -> DeckStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn track(&self) -> Option<&Shared<Track>> {
        self.player.track()
    }

    pub fn beat_tap(&self) -> BeatTap {
        self.tap
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.player.snapshot()
    }

    /// Start loading `path`
    ///
    /// The current track keeps playing until the import completes. Any
    /// import already in flight is superseded.
    pub fn load(&mut self, path: impl Into<PathBuf>) -> ImportRequest {
        self.generation += 1;
        self.status = DeckStatus::Importing;
        self.publish();
        ImportRequest {
            deck: self.index,
            generation: self.generation,
            path: path.into(),
            rate: self.sample_rate,
        }
    }

    /// Install the result of an import
    ///
    /// `None` means the import failed and the deck empties. Returns false,
    /// leaving the deck untouched, if a newer load has superseded this one.
    pub fn finish_import(&mut self, generation: u64, track: Option<Shared<Track>>) -> bool {
        if generation != self.generation || self.status != DeckStatus::Importing {
            return false;
        }
        self.install(track);
        true
    }

    /// Swap in a track directly, outside the import protocol
    pub fn set_track(&mut self, track: Option<Shared<Track>>) {
        self.generation += 1;
        self.install(track);
    }

    fn install(&mut self, track: Option<Shared<Track>>) {
        self.status = if track.is_some() {
            DeckStatus::Loaded
        } else {
            DeckStatus::Empty
        };
        // The old track's memory goes back through the collector
        drop(self.player.set_track(track));
        self.cues.clear();
        self.tap = BeatTap::AwaitingFirstTap;
        self.publish();
    }

    pub fn recue(&mut self) {
        self.player.recue();
        self.publish();
    }

    pub fn seek_to(&mut self, seconds: f64) {
        self.player.seek_to(seconds);
        self.publish();
    }

    /// Jump to a fraction of the track, 0.0 to 1.0
    pub fn seek_relative(&mut self, fraction: f64) {
        let Some(duration) = self.player.track().map(|track| track.duration()) else {
            return;
        };
        if !fraction.is_finite() {
            return;
        }
        self.seek_to(fraction.clamp(0.0, 1.0) * duration);
    }

    pub fn set_pitch(&mut self, pitch: f64) {
        self.player.set_pitch(pitch);
        self.publish();
    }

    /// Start or stop in internal mode; take over from the record in timecode mode
    pub fn play(&mut self) {
        match self.player.mode() {
            ControlMode::Timecode => {
                self.player.set_mode(ControlMode::Internal);
                self.player.set_pitch(1.0);
            }
            ControlMode::Internal => {
                let pitch = if self.player.pitch() == 0.0 { 1.0 } else { 0.0 };
                self.player.set_pitch(pitch);
            }
        }
        self.publish();
    }

    pub fn toggle_timecode(&mut self) {
        self.player.toggle_control_mode();
        self.publish();
    }

    pub fn set_mode(&mut self, mode: ControlMode) {
        self.player.set_mode(mode);
        self.publish();
    }

    /// Jump to `label` if set, otherwise store the current position there
    pub fn cue(&mut self, label: usize) {
        if self.cues.is_set(label) {
            self.cue_go(label);
        } else {
            self.cue_set(label, None);
        }
    }

    /// Store a position, defaulting to the current one
    pub fn cue_set(&mut self, label: usize, seconds: Option<f64>) -> bool {
        let position = seconds.unwrap_or_else(|| self.player.get_elapsed());
        self.cues.set(label, position)
    }

    pub fn cue_unset(&mut self, label: usize) -> bool {
        self.cues.unset(label)
    }

    pub fn cue_go(&mut self, label: usize) -> bool {
        match self.cues.get(label) {
            Some(position) => {
                self.seek_to(position);
                true
            }
            None => false,
        }
    }

    /// Fill cues from label 0 onwards
    pub fn cue_set_many(&mut self, positions: &[f64]) -> usize {
        self.cues.set_many(positions)
    }

    /// Take on another deck's track, playback state, decoder state and cues
    ///
    /// The needle under this deck is a different one, so the player
    /// re-anchors on the next resolved reading instead of jumping.
    pub fn clone_from(&mut self, source: &Deck) {
        if source.index == self.index {
            return;
        }
        self.player = source.player.clone();
        self.player.mark_recalibrate();
        self.decoder = source.decoder;
        self.decoder_state = source.decoder_state.clone();
        self.reading = source.reading;
        self.cues = source.cues;
        self.tap = BeatTap::AwaitingFirstTap;
        // An import in flight here would overwrite what was just cloned
        self.generation += 1;
        self.status = if self.player.has_track() {
            DeckStatus::Loaded
        } else {
            DeckStatus::Empty
        };
        self.publish();
    }

    /// Switch control record; resets the decoder
    pub fn set_definition(&mut self, definition: &'static TimecodeDefinition) {
        if definition == self.decoder.definition() {
            return;
        }
        self.decoder = TimecodeDecoder::new(definition, self.sample_rate);
        self.decoder_state = self.decoder.new_state();
        self.reading = DecoderReading::default();
        self.player.mark_recalibrate();
        self.publish();
        log::info!("Deck {} timecode set to {}", self.index + 1, definition.name);
    }

    pub fn cycle_definition(&mut self) {
        self.set_definition(self.decoder.definition().next_after());
    }

    /// Record a tempo tap at the current position
    ///
    /// Returns the new tempo once the second tap lands.
    pub fn tap_beat(&mut self) -> Option<f64> {
        let track = self.player.track()?.clone();
        let now = self.player.get_position();

        match self.tap {
            BeatTap::AwaitingFirstTap => {
                self.tap = BeatTap::AwaitingSecondTap { first: now };
                None
            }
            BeatTap::AwaitingSecondTap { first } => {
                let interval = now - first;
                if interval <= 0.0 {
                    // Tapped backwards; this tap starts over
                    self.tap = BeatTap::AwaitingSecondTap { first: now };
                    return None;
                }
                self.tap = BeatTap::AwaitingFirstTap;
                track.set_beat(interval, first);
                self.publish();
                track.bpm()
            }
        }
    }

    pub fn bpm(&self) -> Option<f64> {
        self.player.track().and_then(|track| track.bpm())
    }

    pub fn set_bpm(&mut self, bpm: f64) -> bool {
        let set = self
            .player
            .track()
            .map(|track| track.set_bpm(bpm))
            .unwrap_or(false);
        if set {
            self.publish();
        }
        set
    }

    /// Realtime block: decode `input`, render `output`
    pub fn process(&mut self, input: &[StereoSample], output: &mut [StereoSample]) {
        self.decoder
            .process(&mut self.decoder_state, input, Some(&self.monitor));
        self.reading = self.decoder.reading(&self.decoder_state);
        self.player.process_block(Some(&self.reading), output);
        self.publish();
    }

    fn publish(&self) {
        let a = &self.atomics;
        let relaxed = Ordering::Relaxed;
        a.elapsed.store(self.player.get_elapsed().to_bits(), relaxed);
        a.position.store(self.player.get_position().to_bits(), relaxed);
        a.pitch.store(self.player.pitch().to_bits(), relaxed);
        a.speed.store(self.reading.speed.to_bits(), relaxed);
        a.confidence.store(self.reading.confidence.to_bits(), relaxed);
        a.resolved.store(self.reading.is_resolved(), relaxed);
        a.mode.store(self.player.mode() as u8, relaxed);
        a.status.store(self.status as u8, relaxed);

        let (len, rate, bpm) = match self.player.track() {
            Some(track) => (track.len() as u64, track.rate(), track.bpm().unwrap_or(0.0)),
            None => (0, 0, 0.0),
        };
        a.track_len.store(len, relaxed);
        a.track_rate.store(rate, relaxed);
        a.bpm.store(bpm.to_bits(), relaxed);
    }
}

impl std::fmt::Debug for Deck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deck")
            .field("index", &self.index)
            .field("definition", &self.decoder.definition().name)
            .field("status", &self.status)
            .field("player", &self.player)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cues::MAX_CUES;
    use crate::timecode::testsignal::TestSignal;
    use crate::timecode::DEFAULT_TIMECODE;

    const RATE: u32 = 44100;

    fn definition(name: &str) -> &'static TimecodeDefinition {
        TimecodeDefinition::find(name).unwrap()
    }

    fn deck() -> Deck {
        Deck::new(0, definition(DEFAULT_TIMECODE), RATE, InterpolationMethod::Linear)
    }

    fn track(seconds: f64) -> Shared<Track> {
        let frames = (seconds * RATE as f64) as usize;
        Track::new("test", RATE, vec![StereoSample::new(0.25, 0.25); frames]).into_shared()
    }

    fn loaded(seconds: f64) -> Deck {
        let mut deck = deck();
        deck.set_track(Some(track(seconds)));
        deck
    }

    #[test]
    fn test_cue_scenario() {
        let mut deck = loaded(15.0);
        deck.seek_to(5.0);
        assert!(deck.cue_set(0, None));

        deck.seek_to(10.0);
        assert!(deck.cue_go(0));
        assert_eq!(deck.player().get_elapsed(), 5.0);
        assert_eq!(deck.atomics().elapsed(), 5.0);
    }

    #[test]
    fn test_cue_set_then_go_every_label() {
        let mut deck = loaded(20.0);
        for label in 0..MAX_CUES {
            deck.seek_to(label as f64);
            deck.cue_set(label, None);
        }
        for label in (0..MAX_CUES).rev() {
            deck.cue_go(label);
            assert_eq!(deck.player().get_elapsed(), label as f64);
        }
    }

    #[test]
    fn test_cue_sets_then_jumps() {
        let mut deck = loaded(15.0);
        deck.seek_to(3.0);
        deck.cue(2);
        assert_eq!(deck.cues().get(2), Some(3.0));

        deck.seek_to(7.0);
        deck.cue(2);
        assert_eq!(deck.player().get_elapsed(), 3.0);
    }

    #[test]
    fn test_invalid_labels_are_ignored() {
        let mut deck = loaded(5.0);
        deck.seek_to(2.0);
        let cues = *deck.cues();

        assert!(!deck.cue_set(MAX_CUES, None));
        assert!(!deck.cue_unset(MAX_CUES + 3));
        assert!(!deck.cue_go(usize::MAX));
        deck.cue(MAX_CUES);

        assert_eq!(*deck.cues(), cues);
        assert_eq!(deck.player().get_elapsed(), 2.0);
    }

    #[test]
    fn test_load_keeps_playing_until_import_lands() {
        let mut deck = loaded(2.0);
        let request = deck.load("/music/next.wav");
        assert_eq!(request.deck, 0);
        assert_eq!(request.rate, RATE);
        assert_eq!(deck.status(), DeckStatus::Importing);
        assert!(deck.track().is_some());

        assert!(deck.finish_import(request.generation, Some(track(3.0))));
        assert_eq!(deck.status(), DeckStatus::Loaded);
        assert_eq!(deck.track().map(|t| t.len()), Some(3 * RATE as usize));
        assert_eq!(deck.atomics().track_len(), 3 * RATE as u64);
    }

    #[test]
    fn test_newer_load_supersedes_older() {
        let mut deck = deck();
        let first = deck.load("a.wav");
        let second = deck.load("b.wav");

        assert!(!deck.finish_import(first.generation, Some(track(1.0))));
        assert!(deck.track().is_none());
        assert!(deck.finish_import(second.generation, Some(track(2.0))));
        assert_eq!(deck.track().map(|t| t.len()), Some(2 * RATE as usize));
    }

    #[test]
    fn test_failed_import_empties_deck() {
        let mut deck = loaded(2.0);
        deck.cue_set(0, Some(1.0));
        let request = deck.load("broken.wav");

        assert!(deck.finish_import(request.generation, None));
        assert_eq!(deck.status(), DeckStatus::Empty);
        assert!(deck.track().is_none());
        assert_eq!(deck.cues().iter().count(), 0);
        assert_eq!(deck.atomics().status(), DeckStatus::Empty);
    }

    #[test]
    fn test_install_resets_position_cues_and_tap() {
        let mut deck = loaded(5.0);
        deck.seek_to(2.0);
        deck.cue_set(1, None);
        deck.tap_beat();

        deck.set_track(Some(track(4.0)));
        assert_eq!(deck.player().get_elapsed(), 0.0);
        assert!(deck.cues().get(1).is_none());
        assert_eq!(deck.beat_tap(), BeatTap::AwaitingFirstTap);
    }

    #[test]
    fn test_clone_copies_state() {
        let mut source = loaded(10.0);
        source.seek_to(4.0);
        source.set_pitch(0.5);
        source.cue_set(3, Some(1.5));
        source.process(&[StereoSample::silence(); 64], &mut [StereoSample::silence(); 64]);

        let mut dest = Deck::new(1, definition("traktor_a"), RATE, InterpolationMethod::Linear);
        dest.clone_from(&source);

        assert_eq!(dest.snapshot(), source.snapshot());
        assert_eq!(dest.decoder_state(), source.decoder_state());
        assert_eq!(dest.cues(), source.cues());
        assert_eq!(dest.definition(), source.definition());
        assert_eq!(dest.status(), DeckStatus::Loaded);
        assert_eq!(dest.atomics().elapsed(), source.atomics().elapsed());
    }

    #[test]
    fn test_clone_supersedes_pending_import() {
        let source = loaded(3.0);
        let mut dest = Deck::new(1, definition(DEFAULT_TIMECODE), RATE, InterpolationMethod::Linear);
        let request = dest.load("slow.wav");

        dest.clone_from(&source);
        assert!(!dest.finish_import(request.generation, None));
        assert_eq!(dest.status(), DeckStatus::Loaded);
    }

    #[test]
    fn test_play_toggles_and_takes_over() {
        let mut deck = loaded(5.0);
        deck.play();
        assert_eq!(deck.player().pitch(), 1.0);
        deck.play();
        assert_eq!(deck.player().pitch(), 0.0);

        deck.toggle_timecode();
        assert_eq!(deck.player().mode(), ControlMode::Timecode);
        deck.play();
        assert_eq!(deck.player().mode(), ControlMode::Internal);
        assert_eq!(deck.player().pitch(), 1.0);
    }

    #[test]
    fn test_seek_relative() {
        let mut deck = loaded(8.0);
        deck.seek_relative(0.5);
        assert_eq!(deck.player().get_elapsed(), 4.0);
        deck.seek_relative(-1.0);
        assert_eq!(deck.player().get_elapsed(), 0.0);

        let mut empty = self::deck();
        empty.seek_relative(0.5);
        assert_eq!(empty.player().get_elapsed(), 0.0);
    }

    #[test]
    fn test_tap_tempo() {
        let mut deck = loaded(5.0);
        assert_eq!(deck.bpm(), None);

        deck.seek_to(1.0);
        assert_eq!(deck.tap_beat(), None);
        deck.seek_to(1.5);
        let bpm = deck.tap_beat().unwrap();
        assert!((bpm - 120.0).abs() < 1e-9);
        assert_eq!(deck.track().unwrap().beat_offset(), RATE as f64);
        assert_eq!(deck.atomics().bpm(), Some(bpm));
        assert_eq!(deck.beat_tap(), BeatTap::AwaitingFirstTap);
    }

    #[test]
    fn test_backwards_tap_restarts() {
        let mut deck = loaded(5.0);
        deck.seek_to(2.0);
        deck.tap_beat();
        deck.seek_to(1.0);
        assert_eq!(deck.tap_beat(), None);
        assert_eq!(
            deck.beat_tap(),
            BeatTap::AwaitingSecondTap { first: RATE as f64 }
        );

        deck.seek_to(2.0);
        assert!((deck.tap_beat().unwrap() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_bpm() {
        let mut deck = loaded(5.0);
        assert!(deck.set_bpm(128.0));
        assert!((deck.bpm().unwrap() - 128.0).abs() < 1e-9);
        assert!(!deck.set_bpm(0.0));
        assert!(!self::deck().set_bpm(120.0));
    }

    #[test]
    fn test_definition_switch_resets_decoder() {
        let mut deck = loaded(5.0);
        let def = deck.definition();
        let mut signal = TestSignal::new(def, RATE, 5000.0);
        let mut out = vec![StereoSample::silence(); 256];
        for _ in 0..40 {
            let input = signal.render(1.0, 256);
            deck.process(&input, &mut out);
        }
        assert!(deck.decoder_state().confidence() > 0.0);

        deck.cycle_definition();
        assert_eq!(deck.definition(), def.next_after());
        assert_eq!(deck.decoder_state().confidence(), 0.0);
        assert!(!deck.reading().is_resolved());
    }

    #[test]
    fn test_follows_timecode_record() {
        let mut deck = loaded(30.0);
        deck.toggle_timecode();

        let mut signal = TestSignal::new(deck.definition(), RATE, 10_000.0);
        let mut out = vec![StereoSample::silence(); 256];
        for _ in 0..600 {
            let input = signal.render(1.0, 256);
            deck.process(&input, &mut out);
        }

        let atomics = deck.atomics();
        assert!(atomics.is_resolved());
        assert!((atomics.speed() - 1.0).abs() < 0.05);
        // Roughly 3.5s of record played; the deck plays along once locked
        let elapsed = deck.player().get_elapsed();
        assert!(elapsed > 2.5 && elapsed < 3.6, "elapsed {}", elapsed);
        assert!(out.iter().any(|s| s.left != 0.0));
    }
}
