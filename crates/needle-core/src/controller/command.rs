//! Remote deck commands and their text form
//!
//! Commands are addressed per deck, OSC style, with whitespace separated
//! arguments:
//!
//! ```text
//! /deck1/cue/set 3 12.5
//! /deck2/load /music/track.flac
//! /deck1/timecode/set traktor_a
//! /quit
//! ```
//!
//! Deck numbers and cue labels are 1-based in text and 0-based once
//! parsed. Text that is malformed fails to parse; text that is well formed
//! but names a deck or label that does not exist parses fine and is
//! ignored when applied.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown address: {0}")]
    UnknownAddress(String),

    #[error("Bad deck number in {0}")]
    BadDeck(String),

    #[error("{address} expects {expected}")]
    MissingArgument {
        address: String,
        expected: &'static str,
    },

    #[error("{address}: cannot parse {value:?} as {expected}")]
    BadArgument {
        address: String,
        value: String,
        expected: &'static str,
    },
}

pub type CommandResult<T> = Result<T, CommandError>;

/// What to do to a deck
#[derive(Debug, Clone, PartialEq)]
pub enum DeckVerb {
    BpmGet,
    BpmSet(f64),
    BpmTap,
    /// Copy another deck onto this one
    Clone { source: usize },
    /// Toggle timecode control
    Connect,
    Load(PathBuf),
    Cue(usize),
    CueGo(usize),
    CueSet { label: usize, seconds: Option<f64> },
    CueSetMany(Vec<f64>),
    CueUnset(usize),
    Pitch(f64),
    Play,
    /// Seek to seconds
    Position(f64),
    PositionGet,
    Recue,
    /// Seek to a fraction of the track
    Seek(f64),
    TimecodeCycle,
    TimecodeSet(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    Deck { deck: usize, verb: DeckVerb },
    Quit,
}

/// Answers to the `get` verbs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    Bpm { deck: usize, bpm: Option<f64> },
    Position { deck: usize, seconds: Option<f64> },
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (deck, what, value) = match *self {
            Reply::Bpm { deck, bpm } => (deck, "bpm", bpm),
            Reply::Position { deck, seconds } => (deck, "position", seconds),
        };
        match value {
            Some(value) => write!(f, "/deck{}/{} {:.3}", deck + 1, what, value),
            None => write!(f, "/deck{}/{} none", deck + 1, what),
        }
    }
}

impl RemoteCommand {
    pub fn deck(deck: usize, verb: DeckVerb) -> Self {
        RemoteCommand::Deck { deck, verb }
    }

    pub fn parse(line: &str) -> CommandResult<Self> {
        let line = line.trim();
        let (address, rest) = match line.split_once(char::is_whitespace) {
            Some((address, rest)) => (address, rest.trim()),
            None => (line, ""),
        };
        if address.is_empty() {
            return Err(CommandError::Empty);
        }
        if address == "/quit" {
            return Ok(RemoteCommand::Quit);
        }

        let tail = address
            .strip_prefix("/deck")
            .ok_or_else(|| CommandError::UnknownAddress(address.to_string()))?;
        let (number, verb) = tail.split_once('/').unwrap_or((tail, ""));
        let deck = number
            .parse::<usize>()
            .map_err(|_| CommandError::BadDeck(address.to_string()))?
            .wrapping_sub(1);

        let args = Args {
            address,
            rest,
            words: rest.split_whitespace().collect(),
        };

        let verb = match verb {
            "bpm/get" => DeckVerb::BpmGet,
            "bpm/set" => DeckVerb::BpmSet(args.get(0, "a tempo")?),
            "bpm/tap" => DeckVerb::BpmTap,
            "clone" => DeckVerb::Clone {
                source: args.number(0, "a deck number")?,
            },
            "connect" => DeckVerb::Connect,
            "load" => DeckVerb::Load(PathBuf::from(args.text("a path")?)),
            "cue" => DeckVerb::Cue(args.number(0, "a cue label")?),
            "cue/go" => DeckVerb::CueGo(args.number(0, "a cue label")?),
            "cue/set" => args.cue_set()?,
            "cue/unset" => DeckVerb::CueUnset(args.number(0, "a cue label")?),
            "pitch" => DeckVerb::Pitch(args.get(0, "a pitch")?),
            "play" => DeckVerb::Play,
            "position" | "position/set" => DeckVerb::Position(args.get(0, "seconds")?),
            "position/get" => DeckVerb::PositionGet,
            "recue" => DeckVerb::Recue,
            "seek" => DeckVerb::Seek(args.get(0, "a fraction")?),
            "timecode/cycle" => DeckVerb::TimecodeCycle,
            "timecode/set" => DeckVerb::TimecodeSet(args.text("a timecode name")?.to_string()),
            _ => return Err(CommandError::UnknownAddress(address.to_string())),
        };

        Ok(RemoteCommand::Deck { deck, verb })
    }
}

impl FromStr for RemoteCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Args<'a> {
    address: &'a str,
    rest: &'a str,
    words: Vec<&'a str>,
}

impl Args<'_> {
    fn word(&self, index: usize, expected: &'static str) -> CommandResult<&str> {
        self.words
            .get(index)
            .copied()
            .ok_or_else(|| CommandError::MissingArgument {
                address: self.address.to_string(),
                expected,
            })
    }

    fn get<T: FromStr>(&self, index: usize, expected: &'static str) -> CommandResult<T> {
        let word = self.word(index, expected)?;
        word.parse().map_err(|_| CommandError::BadArgument {
            address: self.address.to_string(),
            value: word.to_string(),
            expected,
        })
    }

    /// A 1-based number, returned 0-based
    fn number(&self, index: usize, expected: &'static str) -> CommandResult<usize> {
        self.get::<usize>(index, expected).map(|n| n.wrapping_sub(1))
    }

    /// Everything after the address, spaces included
    fn text(&self, expected: &'static str) -> CommandResult<&str> {
        if self.rest.is_empty() {
            return Err(CommandError::MissingArgument {
                address: self.address.to_string(),
                expected,
            });
        }
        Ok(self.rest)
    }

    /// `label`, `label seconds`, or a list of two or more positions
    fn cue_set(&self) -> CommandResult<DeckVerb> {
        let labelled = self.words.len() <= 2
            && self
                .words
                .first()
                .is_some_and(|w| w.bytes().all(|b| b.is_ascii_digit()));

        if labelled {
            let label = self.number(0, "a cue label")?;
            let seconds = match self.words.len() {
                2 => Some(self.get(1, "seconds")?),
                _ => None,
            };
            return Ok(DeckVerb::CueSet { label, seconds });
        }

        if self.words.is_empty() {
            return Err(CommandError::MissingArgument {
                address: self.address.to_string(),
                expected: "a cue label",
            });
        }
        let positions = (0..self.words.len())
            .map(|i| self.get(i, "seconds"))
            .collect::<CommandResult<Vec<f64>>>()?;
        Ok(DeckVerb::CueSetMany(positions))
    }
}
