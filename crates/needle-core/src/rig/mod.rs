//! Rig - the decks, the lock around them, and the threads that use it
//!
//! The rig is built once at startup with a fixed number of decks and then
//! shared by `Arc` between the audio callback, the controller thread, the
//! service thread and whatever UI is attached.
//!
//! ## Locking
//!
//! All deck state sits behind one mutex. Control operations hold it only
//! for O(1) work: anything slow (decoding a track, building a timecode
//! lookup, spawning a thread) happens before or after. The audio callback
//! never waits on it; [`Rig::process`] spins on `try_lock` a bounded number
//! of times and plays silence for the block if it cannot get in.
//!
//! ```text
//!  controllers ──┐                           ┌──► DeckAtomics (UI reads)
//!  UI ───────────┼──► lock() ──► [Deck; N] ──┤
//!  service ──────┘        ▲                  └──► output blocks
//!                         │ try_lock
//!  audio callback ── process(BlockBuffers)
//! ```
//!
//! ## Imports
//!
//! [`Rig::load`] hands the deck's import request to a worker thread. The
//! finished track comes back over a channel to the service loop, which
//! installs it under the lock if no newer load has been issued since.

pub mod realtime;
mod shutdown;

pub use realtime::RealtimeLoop;
pub use shutdown::Shutdown;

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use basedrop::Shared;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use crate::config::RigConfig;
use crate::controller::Controller;
use crate::engine::{Deck, DeckAtomics, ImportRequest};
use crate::status::StatusBoard;
use crate::timecode::{MonitorTap, TimecodeDefinition, TimecodeError};
use crate::track::import::{ImportError, Importer};
use crate::track::Track;
use crate::types::{StereoBuffer, StereoSample, MAX_DECKS};

/// Sleep between service and controller passes
pub const SERVICE_TICK: Duration = Duration::from_millis(50);

/// Attempts at the deck lock before the audio thread gives up on a block
const LOCK_SPINS: u32 = 64;

/// Minimum time between contention reports
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum RigError {
    #[error("A rig needs at least one deck")]
    NoDecks,

    #[error("{count} decks configured, at most {max} supported")]
    TooManyDecks { count: usize, max: usize },

    #[error(transparent)]
    Timecode(#[from] TimecodeError),
}

pub type RigResult<T> = Result<T, RigError>;

/// A finished import on its way back to the deck
struct ImportCompletion {
    deck: usize,
    generation: u64,
    path: PathBuf,
    result: Result<Shared<Track>, ImportError>,
}

/// Per-deck audio for one block, allocated once up front
#[derive(Debug)]
pub struct BlockBuffers {
    inputs: Vec<StereoBuffer>,
    outputs: Vec<StereoBuffer>,
    frames: usize,
}

impl BlockBuffers {
    pub fn new(decks: usize, max_frames: usize) -> Self {
        let make = || {
            (0..decks)
                .map(|_| StereoBuffer::with_capacity(max_frames))
                .collect::<Vec<_>>()
        };
        let mut buffers = Self {
            inputs: make(),
            outputs: make(),
            frames: 0,
        };
        buffers.set_frames(max_frames);
        buffers
    }

    pub fn decks(&self) -> usize {
        self.inputs.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn max_frames(&self) -> usize {
        self.inputs.first().map(|b| b.capacity()).unwrap_or(0)
    }

    /// Resize every buffer for the next block, never beyond capacity
    pub fn set_frames(&mut self, frames: usize) {
        let frames = frames.min(self.max_frames());
        for buffer in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            buffer.set_len_from_capacity(frames);
        }
        self.frames = frames;
    }

    pub fn input_mut(&mut self, deck: usize) -> &mut [StereoSample] {
        self.inputs[deck].as_mut_slice()
    }

    pub fn input(&self, deck: usize) -> &[StereoSample] {
        self.inputs[deck].as_slice()
    }

    pub fn output(&self, deck: usize) -> &[StereoSample] {
        self.outputs[deck].as_slice()
    }

    pub fn output_mut(&mut self, deck: usize) -> &mut [StereoSample] {
        self.outputs[deck].as_mut_slice()
    }

    pub fn silence_outputs(&mut self) {
        for buffer in &mut self.outputs {
            buffer.fill_silence();
        }
    }
}

/// Exclusive access to the decks; unlocks on drop
pub struct RigGuard<'a> {
    decks: MutexGuard<'a, Vec<Deck>>,
}

impl RigGuard<'_> {
    /// Copy `source` onto `dest`; same deck or bad index is a no-op
    pub fn clone_deck(&mut self, dest: usize, source: usize) -> bool {
        if dest == source || dest >= self.decks.len() || source >= self.decks.len() {
            return false;
        }
        let (dest, source) = if dest < source {
            let (head, tail) = self.decks.split_at_mut(source);
            (&mut head[dest], &tail[0])
        } else {
            let (head, tail) = self.decks.split_at_mut(dest);
            (&mut tail[0], &head[source])
        };
        dest.clone_from(source);
        true
    }
}

impl Deref for RigGuard<'_> {
    type Target = [Deck];

    fn deref(&self) -> &[Deck] {
        &self.decks
    }
}

impl DerefMut for RigGuard<'_> {
    fn deref_mut(&mut self) -> &mut [Deck] {
        &mut self.decks
    }
}

pub struct Rig {
    decks: Mutex<Vec<Deck>>,
    atomics: Vec<Arc<DeckAtomics>>,
    monitors: Vec<Arc<MonitorTap>>,
    sample_rate: u32,
    status: StatusBoard,
    shutdown: Arc<Shutdown>,
    importer: Arc<dyn Importer>,
    completions_tx: Sender<ImportCompletion>,
    completions_rx: Receiver<ImportCompletion>,
    controllers: Mutex<Vec<Box<dyn Controller>>>,
    /// Blocks played as silence because the lock was busy
    contention: AtomicU64,
    /// Input frames the device failed to deliver
    underruns: AtomicU64,
}

impl Rig {
    pub fn new(config: &RigConfig, sample_rate: u32, importer: Arc<dyn Importer>) -> RigResult<Self> {
        match config.decks.len() {
            0 => return Err(RigError::NoDecks),
            count if count > MAX_DECKS => {
                return Err(RigError::TooManyDecks {
                    count,
                    max: MAX_DECKS,
                })
            }
            _ => {}
        }

        let decks = config
            .decks
            .iter()
            .enumerate()
            .map(|(index, deck)| -> RigResult<Deck> {
                let definition = TimecodeDefinition::find(&deck.timecode)
                    .ok_or_else(|| TimecodeError::UnknownDefinition(deck.timecode.clone()))?;
                Ok(Deck::new(index, definition, sample_rate, config.interpolation))
            })
            .collect::<RigResult<Vec<_>>>()?;

        let atomics = decks.iter().map(Deck::atomics).collect();
        let monitors = decks.iter().map(Deck::monitor).collect();
        let (completions_tx, completions_rx) = channel::unbounded();

        log::info!("Rig ready: {} decks at {}Hz", decks.len(), sample_rate);

        Ok(Self {
            decks: Mutex::new(decks),
            atomics,
            monitors,
            sample_rate,
            status: StatusBoard::new(),
            shutdown: Arc::new(Shutdown::new()),
            importer,
            completions_tx,
            completions_rx,
            controllers: Mutex::new(Vec::new()),
            contention: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        })
    }

    pub fn deck_count(&self) -> usize {
        self.atomics.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn atomics(&self, deck: usize) -> Option<Arc<DeckAtomics>> {
        self.atomics.get(deck).cloned()
    }

    pub fn monitor(&self, deck: usize) -> Option<Arc<MonitorTap>> {
        self.monitors.get(deck).cloned()
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn shutdown_signal(&self) -> Arc<Shutdown> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_quit(&self) {
        if !self.shutdown.is_requested() {
            log::info!("Quit requested");
        }
        self.shutdown.request();
    }

    pub fn is_quit_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    pub fn contention_count(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }

    pub fn note_underrun(&self, frames: u64) {
        self.underruns.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Lock the decks for control work
    pub fn lock(&self) -> RigGuard<'_> {
        let decks = self.decks.lock().unwrap_or_else(|poisoned| {
            log::error!("Deck lock poisoned, recovering");
            poisoned.into_inner()
        });
        RigGuard { decks }
    }

    fn with_deck<R>(&self, deck: usize, f: impl FnOnce(&mut Deck) -> R) -> Option<R> {
        let mut guard = self.lock();
        match guard.get_mut(deck) {
            Some(d) => Some(f(d)),
            None => {
                log::debug!("Ignoring operation on deck index {}", deck);
                None
            }
        }
    }

    // --- Control operations. Bad deck indices are ignored. ---

    /// Start importing `path` onto `deck`
    pub fn load(&self, deck: usize, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        let Some(request) = self.with_deck(deck, |d| d.load(path)) else {
            return false;
        };
        self.spawn_import(request);
        true
    }

    fn spawn_import(&self, request: ImportRequest) {
        let importer = Arc::clone(&self.importer);
        let tx = self.completions_tx.clone();
        let ImportRequest {
            deck,
            generation,
            path,
            rate,
        } = request;

        let spawned = thread::Builder::new()
            .name(format!("import-deck{}", deck + 1))
            .spawn({
                let path = path.clone();
                move || {
                    let result = importer.import(&path, rate).map(Track::into_shared);
                    // The rig may be gone by now; nothing to do then
                    let _ = tx.send(ImportCompletion {
                        deck,
                        generation,
                        path,
                        result,
                    });
                }
            });

        if let Err(e) = spawned {
            self.with_deck(deck, |d| d.finish_import(generation, None));
            self.status
                .error(format!("Deck {}: cannot start import of {:?}: {}", deck + 1, path, e));
        }
    }

    pub fn recue(&self, deck: usize) {
        self.with_deck(deck, Deck::recue);
    }

    pub fn cue(&self, deck: usize, label: usize) {
        self.with_deck(deck, |d| d.cue(label));
    }

    pub fn cue_set(&self, deck: usize, label: usize, seconds: Option<f64>) -> bool {
        self.with_deck(deck, |d| d.cue_set(label, seconds))
            .unwrap_or(false)
    }

    pub fn cue_set_many(&self, deck: usize, positions: &[f64]) -> usize {
        self.with_deck(deck, |d| d.cue_set_many(positions))
            .unwrap_or(0)
    }

    pub fn cue_unset(&self, deck: usize, label: usize) -> bool {
        self.with_deck(deck, |d| d.cue_unset(label)).unwrap_or(false)
    }

    pub fn cue_go(&self, deck: usize, label: usize) -> bool {
        self.with_deck(deck, |d| d.cue_go(label)).unwrap_or(false)
    }

    pub fn clone_deck(&self, dest: usize, source: usize) {
        if !self.lock().clone_deck(dest, source) && dest != source {
            log::debug!("Ignoring clone of deck {} onto {}", source, dest);
        }
    }

    pub fn set_pitch(&self, deck: usize, pitch: f64) {
        self.with_deck(deck, |d| d.set_pitch(pitch));
    }

    pub fn play(&self, deck: usize) {
        self.with_deck(deck, Deck::play);
    }

    pub fn toggle_timecode(&self, deck: usize) {
        self.with_deck(deck, Deck::toggle_timecode);
    }

    pub fn seek_to(&self, deck: usize, seconds: f64) {
        self.with_deck(deck, |d| d.seek_to(seconds));
    }

    pub fn seek_relative(&self, deck: usize, fraction: f64) {
        self.with_deck(deck, |d| d.seek_relative(fraction));
    }

    pub fn elapsed(&self, deck: usize) -> Option<f64> {
        self.with_deck(deck, |d| d.player().get_elapsed())
    }

    pub fn tap_beat(&self, deck: usize) -> Option<f64> {
        self.with_deck(deck, Deck::tap_beat).flatten()
    }

    pub fn bpm(&self, deck: usize) -> Option<f64> {
        self.with_deck(deck, |d| d.bpm()).flatten()
    }

    pub fn set_bpm(&self, deck: usize, bpm: f64) -> bool {
        self.with_deck(deck, |d| d.set_bpm(bpm)).unwrap_or(false)
    }

    /// Switch a deck's control record by name
    pub fn set_definition(&self, deck: usize, name: &str) -> bool {
        if deck >= self.deck_count() {
            return false;
        }
        let Some(definition) = TimecodeDefinition::find(name) else {
            self.status
                .alert(format!("Deck {}: unknown timecode {:?}", deck + 1, name));
            return false;
        };
        definition.prepare();
        self.with_deck(deck, |d| d.set_definition(definition));
        true
    }

    pub fn cycle_definition(&self, deck: usize) {
        let Some(next) = self.with_deck(deck, |d| d.definition().next_after()) else {
            return;
        };
        next.prepare();
        self.with_deck(deck, |d| d.set_definition(next));
    }

    // --- Realtime ---

    /// Decode and render one block for every deck
    ///
    /// Called from the audio thread. Never blocks, never allocates.
    pub fn process(&self, buffers: &mut BlockBuffers) {
        let Some(mut decks) = self.try_lock_decks() else {
            buffers.silence_outputs();
            self.contention.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let BlockBuffers {
            inputs, outputs, ..
        } = buffers;
        for ((deck, input), output) in decks.iter_mut().zip(inputs.iter()).zip(outputs.iter_mut()) {
            deck.process(input.as_slice(), output.as_mut_slice());
        }

        if let Ok(mut controllers) = self.controllers.try_lock() {
            for controller in controllers.iter_mut() {
                controller.realtime_tick(&mut decks);
            }
        }
    }

    fn try_lock_decks(&self) -> Option<MutexGuard<'_, Vec<Deck>>> {
        for _ in 0..LOCK_SPINS {
            match self.decks.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => std::hint::spin_loop(),
            }
        }
        None
    }

    // --- Service and controller loops ---

    /// Install finished imports; waits up to `timeout` for the first one
    ///
    /// Returns the number of completions handled, stale ones included.
    pub fn service(&self, timeout: Duration) -> usize {
        let first = match self.completions_rx.recv_timeout(timeout) {
            Ok(completion) => completion,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return 0,
        };
        self.complete_import(first);

        let mut handled = 1;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.complete_import(completion);
            handled += 1;
        }
        handled
    }

    fn complete_import(&self, completion: ImportCompletion) {
        let ImportCompletion {
            deck,
            generation,
            path,
            result,
        } = completion;

        let (track, error) = match result {
            Ok(track) => (Some(track), None),
            Err(e) => (None, Some(e)),
        };
        let frames = track.as_ref().map(|t| t.len()).unwrap_or(0);

        let installed = self
            .with_deck(deck, |d| d.finish_import(generation, track))
            .unwrap_or(false);
        if !installed {
            log::debug!("Deck {}: discarding superseded import of {:?}", deck + 1, path);
            return;
        }

        match error {
            None => self.status.info(format!(
                "Deck {}: loaded {} ({:.1}s)",
                deck + 1,
                display_name(&path),
                frames as f64 / self.sample_rate.max(1) as f64
            )),
            Some(e) => self.status.error(format!(
                "Deck {}: failed to import {}: {}",
                deck + 1,
                display_name(&path),
                e
            )),
        }
    }

    /// Service thread body; returns once quit is requested
    pub fn run_service(&self) {
        log::info!("Rig service started");
        let mut reported = 0;
        let mut last_report = Instant::now();

        while !self.shutdown.is_requested() {
            self.service(SERVICE_TICK);

            if last_report.elapsed() >= REPORT_INTERVAL {
                let contention = self.contention_count();
                if contention != reported {
                    log::warn!(
                        "{} audio blocks skipped on a busy deck lock",
                        contention - reported
                    );
                    reported = contention;
                }
                last_report = Instant::now();
            }
        }
        log::info!("Rig service stopped");
    }

    pub fn add_controller(&self, controller: Box<dyn Controller>) {
        log::info!("Controller {} attached", controller.name());
        self.lock_controllers().push(controller);
    }

    fn lock_controllers(&self) -> MutexGuard<'_, Vec<Box<dyn Controller>>> {
        self.controllers.lock().unwrap_or_else(|poisoned| {
            log::error!("Controller lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Poll every controller once
    pub fn poll_controllers(&self) {
        let mut controllers = self.lock_controllers();
        for controller in controllers.iter_mut() {
            if let Err(e) = controller.poll(self) {
                self.status.alert(format!("{}: {}", controller.name(), e));
            }
        }
    }

    /// Controller thread body; shuts the controllers down on quit
    pub fn run_controllers(&self) {
        log::info!("Controller loop started");
        loop {
            self.poll_controllers();
            if self.shutdown.wait_timeout(SERVICE_TICK) {
                break;
            }
        }

        for controller in self.lock_controllers().iter_mut() {
            controller.shutdown();
        }
        log::info!("Controller loop stopped");
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl std::fmt::Debug for Rig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rig")
            .field("decks", &self.deck_count())
            .field("sample_rate", &self.sample_rate)
            .field("quit", &self.shutdown.is_requested())
            .finish()
    }
}
