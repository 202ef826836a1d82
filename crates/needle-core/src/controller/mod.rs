//! Controllers - external input mapped onto deck operations
//!
//! A controller is polled from the controller thread and may also get a
//! short realtime tick after each audio block. Every controller drives the
//! decks through the same [`Rig`] operations the UI uses, so bounds checks
//! and no-op-on-garbage behaviour come for free.

pub mod command;

pub use command::{CommandError, DeckVerb, RemoteCommand, Reply};

use flume::{Receiver, Sender, TryRecvError};
use thiserror::Error;

use crate::engine::Deck;
use crate::rig::Rig;
use crate::types::MAX_DECKS;

/// Commands applied per poll, so one chatty source cannot stall the loop
const MAX_COMMANDS_PER_POLL: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Deck {0} does not exist")]
    NoSuchDeck(usize),
}

pub trait Controller: Send {
    fn name(&self) -> &str;

    /// Attach a deck; a controller only acts on decks it was given
    fn add_deck(&mut self, deck: usize) -> Result<(), ControllerError>;

    /// Handle pending input. Called from the controller thread.
    fn poll(&mut self, rig: &Rig) -> Result<(), ControllerError>;

    /// Called with the decks locked after each audio block, when the
    /// controller lock is free. Must not block or allocate.
    fn realtime_tick(&mut self, _decks: &mut [Deck]) {}

    fn shutdown(&mut self);
}

/// Applies [`RemoteCommand`]s received over a channel
pub struct CommandController {
    name: String,
    commands: Receiver<RemoteCommand>,
    replies: Option<Sender<Reply>>,
    decks: [bool; MAX_DECKS],
    closed: bool,
}

impl CommandController {
    pub fn new(name: impl Into<String>, commands: Receiver<RemoteCommand>) -> Self {
        Self {
            name: name.into(),
            commands,
            replies: None,
            decks: [false; MAX_DECKS],
            closed: false,
        }
    }

    /// Send answers to `get` verbs here
    pub fn with_replies(mut self, replies: Sender<Reply>) -> Self {
        self.replies = Some(replies);
        self
    }

    fn owns(&self, deck: usize) -> bool {
        self.decks.get(deck).copied().unwrap_or(false)
    }

    fn reply(&self, reply: Reply) {
        if let Some(tx) = &self.replies {
            // Nobody listening is fine
            let _ = tx.send(reply);
        }
    }

    fn apply(&self, rig: &Rig, command: RemoteCommand) {
        let (deck, verb) = match command {
            RemoteCommand::Quit => {
                log::info!("{}: quit requested", self.name);
                rig.request_quit();
                return;
            }
            RemoteCommand::Deck { deck, verb } => (deck, verb),
        };
        if !self.owns(deck) {
            log::debug!("{}: ignoring command for unattached deck {}", self.name, deck.wrapping_add(1));
            return;
        }

        match verb {
            DeckVerb::BpmGet => self.reply(Reply::Bpm {
                deck,
                bpm: rig.bpm(deck),
            }),
            DeckVerb::BpmSet(bpm) => {
                rig.set_bpm(deck, bpm);
            }
            DeckVerb::BpmTap => {
                rig.tap_beat(deck);
            }
            DeckVerb::Clone { source } => rig.clone_deck(deck, source),
            DeckVerb::Connect => rig.toggle_timecode(deck),
            DeckVerb::Load(path) => {
                rig.load(deck, path);
            }
            DeckVerb::Cue(label) => rig.cue(deck, label),
            DeckVerb::CueGo(label) => {
                rig.cue_go(deck, label);
            }
            DeckVerb::CueSet { label, seconds } => {
                rig.cue_set(deck, label, seconds);
            }
            DeckVerb::CueSetMany(positions) => {
                rig.cue_set_many(deck, &positions);
            }
            DeckVerb::CueUnset(label) => {
                rig.cue_unset(deck, label);
            }
            DeckVerb::Pitch(pitch) => rig.set_pitch(deck, pitch),
            DeckVerb::Play => rig.play(deck),
            DeckVerb::Position(seconds) => rig.seek_to(deck, seconds),
            DeckVerb::PositionGet => self.reply(Reply::Position {
                deck,
                seconds: rig.elapsed(deck),
            }),
            DeckVerb::Recue => rig.recue(deck),
            DeckVerb::Seek(fraction) => rig.seek_relative(deck, fraction),
            DeckVerb::TimecodeCycle => rig.cycle_definition(deck),
            DeckVerb::TimecodeSet(name) => {
                rig.set_definition(deck, &name);
            }
        }
    }
}

impl Controller for CommandController {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_deck(&mut self, deck: usize) -> Result<(), ControllerError> {
        let slot = self
            .decks
            .get_mut(deck)
            .ok_or(ControllerError::NoSuchDeck(deck))?;
        *slot = true;
        Ok(())
    }

    fn poll(&mut self, rig: &Rig) -> Result<(), ControllerError> {
        for _ in 0..MAX_COMMANDS_PER_POLL {
            match self.commands.try_recv() {
                Ok(command) => self.apply(rig, command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.closed {
                        log::info!("{}: command source closed", self.name);
                        self.closed = true;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        log::debug!("{}: shutting down", self.name);
        self.replies = None;
    }
}
