//! Audio device errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio devices found")]
    NoDevices,

    #[error("No default {0} device")]
    NoDefaultDevice(&'static str),

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("No common sample rate: wanted {wanted}Hz, input offers {input}, output offers {output}")]
    SampleRateMismatch {
        wanted: u32,
        input: String,
        output: String,
    },

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
