//! Needle core - timecode vinyl decoding and deck playback
//!
//! The pieces, bottom up:
//!
//! - [`timecode`] turns the stereo signal from a control record into a
//!   position, speed and confidence reading
//! - [`track`] holds decoded audio and imports it through an external tool
//! - [`engine`] has the player, cue points and the deck that ties a decoder
//!   to a player
//! - [`rig`] owns every deck behind one lock and runs the service loop
//! - [`controller`] maps external commands onto rig operations
//! - [`audio`] binds the rig to a sound card through cpal

pub mod audio;
pub mod config;
pub mod controller;
pub mod engine;
pub mod rig;
pub mod status;
pub mod timecode;
pub mod track;
pub mod types;

pub use types::*;
