//! Audio device binding
//!
//! One duplex connection: each deck reads its turntable from a stereo pair
//! of the input device and plays to its own pair on the output device, or
//! to a shared stereo mix when the card is too narrow.
//!
//! ```ignore
//! let plan = needle_core::audio::negotiate(&AudioConfig::default(), 2)?;
//! let rig = Arc::new(Rig::new(&rig_config, plan.sample_rate(), importer)?);
//! let handle = plan.start(Arc::clone(&rig))?;
//! ```

mod config;
mod cpal_backend;
mod device;
mod error;

pub use config::{
    AudioConfig, BufferSize, DeviceId, Routing, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE,
    LOW_LATENCY_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE,
};
pub use cpal_backend::{negotiate, CpalAudioHandle, StreamPlan};
pub use device::{
    find_input_device_by_id, find_output_device_by_id, get_input_devices, get_output_devices,
    AudioDevice, Direction,
};
pub use error::{AudioError, AudioResult};
