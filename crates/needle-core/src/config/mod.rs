//! Configuration shared by needle front ends
//!
//! Everything is plain serde data loaded from YAML. Every struct takes
//! `#[serde(default)]`, so a file only needs the keys it changes:
//!
//! ```yaml
//! rig:
//!   decks:
//!     - timecode: serato_2a
//!     - timecode: traktor_a
//!   interpolation: cubic
//! importer:
//!   command: /usr/local/bin/needle-import
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{config_dir, default_config_path};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::InterpolationMethod;
use crate::timecode::{TimecodeDefinition, DEFAULT_TIMECODE};

/// One deck slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    /// Control record, by catalog name
    pub timecode: String,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            timecode: DEFAULT_TIMECODE.to_string(),
        }
    }
}

/// Deck layout of a rig; the deck count is fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub decks: Vec<DeckConfig>,
    pub interpolation: InterpolationMethod,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            decks: vec![DeckConfig::default(); 2],
            interpolation: InterpolationMethod::default(),
        }
    }
}

impl RigConfig {
    pub fn with_decks(count: usize) -> Self {
        Self {
            decks: vec![DeckConfig::default(); count],
            ..Self::default()
        }
    }

    /// Build the lookup tables for every configured record
    ///
    /// Unknown names are skipped; the rig reports them when it is built.
    pub fn prepare_timecodes(&self) {
        for deck in &self.decks {
            if let Some(definition) = TimecodeDefinition::find(&deck.timecode) {
                definition.prepare();
            }
        }
    }
}

/// External decoder used to load tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    pub command: PathBuf,
    /// Arguments placed before the path and rate
    pub extra_args: Vec<String>,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("needle-import"),
            extra_args: Vec::new(),
        }
    }
}
