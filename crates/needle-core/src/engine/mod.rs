//! Playback engine - decks, players and cue points
//!
//! - [`Player`]: resamples a track, driven by the record or a manual pitch
//! - [`Deck`]: player + timecode decoder + cue points + loaded track
//! - [`gc`]: deferred release of tracks off the audio thread

pub mod cues;
mod deck;
pub mod gc;
mod player;
pub mod resample;

pub use cues::{CuePoints, MAX_CUES};
pub use deck::*;
pub use player::*;
pub use resample::InterpolationMethod;
