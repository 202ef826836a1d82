//! Player configuration
//!
//! Stored as YAML in the user's config directory, by default
//! `~/.config/needle/config.yaml`. Every section falls back to its
//! defaults, so a file only needs the keys it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use needle_core::audio::AudioConfig;
use needle_core::config::{default_config_path, load_config, save_config, ImporterConfig, RigConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.yaml";

/// Shortest status period, so a zero in the file cannot spin the thread
const MIN_STATUS_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Decks, their timecodes and the playback interpolation
    pub rig: RigConfig,
    /// External decoder used to load tracks
    pub importer: ImporterConfig,
    pub audio: AudioConfig,
    /// Read remote commands from stdin
    pub console: bool,
    /// Period of the per-deck status line
    pub status_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            rig: RigConfig::default(),
            importer: ImporterConfig::default(),
            audio: AudioConfig::default(),
            console: true,
            status_interval_ms: 1000,
        }
    }
}

impl PlayerConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(MIN_STATUS_INTERVAL_MS))
    }
}

pub fn config_path(requested: Option<&Path>) -> PathBuf {
    requested
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_config_path(CONFIG_FILE))
}

pub fn load(path: &Path) -> PlayerConfig {
    let config: PlayerConfig = load_config(path);
    log::info!(
        "Config: {} decks, {:?} interpolation, importer {:?}",
        config.rig.decks.len(),
        config.rig.interpolation,
        config.importer.command
    );
    config
}

pub fn save(config: &PlayerConfig, path: &Path) -> Result<()> {
    save_config(config, path)
}
