//! Standard config locations

use std::path::PathBuf;

const APP_DIR: &str = "needle";

/// Per-user directory for needle's files
///
/// The platform config directory, else the home directory, else `.`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default path of a config file, e.g. `~/.config/needle/config.yaml`
pub fn default_config_path(filename: &str) -> PathBuf {
    config_dir().join(filename)
}
