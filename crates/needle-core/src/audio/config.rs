//! Audio device configuration

use serde::{Deserialize, Serialize};

/// Largest block the callbacks pre-allocate for, in frames
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Smallest block we ask a device for
pub const MIN_BUFFER_SIZE: u32 = 64;

/// Block size when the config does not name one
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Block size used for `BufferSize::LowLatency`
pub const LOW_LATENCY_BUFFER_SIZE: u32 = 256;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    #[default]
    Default,
    /// Frames per block, clamped to what the callbacks can take
    Fixed(u32),
    LowLatency,
}

impl BufferSize {
    pub fn frames(&self) -> u32 {
        match *self {
            BufferSize::Default => DEFAULT_BUFFER_SIZE,
            BufferSize::Fixed(frames) => frames.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE as u32),
            BufferSize::LowLatency => LOW_LATENCY_BUFFER_SIZE,
        }
    }

    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        self.frames() as f32 / sample_rate.max(1) as f32 * 1000.0
    }
}

/// How deck outputs map onto device channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Routing {
    /// Deck N on channels 2N, 2N+1 when the device has enough, else summed
    #[default]
    Separate,
    /// Every deck mixed onto the first pair
    Summed,
}

/// A device by name, optionally pinned to one host (ALSA, JACK, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Turntable capture device; `None` is the host default
    pub input_device: Option<DeviceId>,
    /// Playback device; `None` is the host default
    pub output_device: Option<DeviceId>,
    pub buffer_size: BufferSize,
    pub sample_rate: Option<u32>,
    pub routing: Routing,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            buffer_size: BufferSize::default(),
            sample_rate: Some(DEFAULT_SAMPLE_RATE),
            routing: Routing::default(),
        }
    }
}

impl AudioConfig {
    pub fn target_sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_size = BufferSize::Fixed(frames);
        self
    }

    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }
}
