//! Audio device enumeration
//!
//! Devices are listed across every available cpal host, so on Linux both
//! the JACK server and the individual ALSA cards show up. A turntable
//! setup usually wants a multichannel card on ALSA or JACK, one stereo
//! input and output pair per deck.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Capture or playback side of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

fn devices_of(host: &Host, direction: Direction) -> Option<Vec<cpal::Device>> {
    let devices: Result<Vec<cpal::Device>, cpal::DevicesError> = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect()),
        Direction::Output => host.output_devices().map(|d| d.collect()),
    };
    match devices {
        Ok(devices) => Some(devices),
        Err(e) => {
            log::debug!("Could not enumerate {} devices: {}", direction.label(), e);
            None
        }
    }
}

fn default_of(host: &Host, direction: Direction) -> Option<cpal::Device> {
    match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    }
}

/// One device as seen from one host
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub id: DeviceId,
    pub name: String,
    pub host: String,
    pub direction: Direction,
    pub is_default: bool,
    /// Common rates the device accepts
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({} ch, {:?}){}",
            self.host,
            self.name,
            self.max_channels,
            self.sample_rates,
            if self.is_default { " *" } else { "" }
        )
    }
}

fn describe(device: &cpal::Device, direction: Direction) -> Option<(u16, Vec<u32>)> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().ok()?.collect(),
        Direction::Output => device.supported_output_configs().ok()?.collect(),
    };
    if ranges.is_empty() {
        return None;
    }

    let mut rates = Vec::new();
    let mut channels = 0;
    for range in &ranges {
        channels = channels.max(range.channels());
        for rate in [44100, 48000, 88200, 96000] {
            if (range.min_sample_rate().0..=range.max_sample_rate().0).contains(&rate)
                && !rates.contains(&rate)
            {
                rates.push(rate);
            }
        }
    }
    rates.sort_unstable();
    Some((channels, rates))
}

fn list_devices(direction: Direction) -> AudioResult<Vec<AudioDevice>> {
    let mut all = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);
        let default_name = default_of(&host, direction).and_then(|d| d.name().ok());

        for device in devices_of(&host, direction).unwrap_or_default() {
            let Ok(name) = device.name() else { continue };
            let Some((max_channels, sample_rates)) = describe(&device, direction) else {
                continue;
            };
            all.push(AudioDevice {
                id: DeviceId::with_host(&name, &host_label),
                is_default: default_name.as_ref() == Some(&name),
                name,
                host: host_label.clone(),
                direction,
                sample_rates,
                max_channels,
            });
        }
    }

    if all.is_empty() {
        return Err(AudioError::NoDevices);
    }

    all.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });
    log::debug!("Found {} {} devices", all.len(), direction.label());
    Ok(all)
}

pub fn get_input_devices() -> AudioResult<Vec<AudioDevice>> {
    list_devices(Direction::Input)
}

pub fn get_output_devices() -> AudioResult<Vec<AudioDevice>> {
    list_devices(Direction::Output)
}

fn find_device(id: &DeviceId, direction: Direction) -> AudioResult<cpal::Device> {
    let matches = |d: &cpal::Device| d.name().ok().as_deref() == Some(id.name.as_str());

    if let Some(host) = id.host.as_deref().and_then(host_by_name) {
        return devices_of(&host, direction)
            .unwrap_or_default()
            .into_iter()
            .find(matches)
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()));
    }

    cpal::available_hosts()
        .into_iter()
        .filter_map(|host_id| cpal::host_from_id(host_id).ok())
        .filter_map(|host| devices_of(&host, direction))
        .flatten()
        .find(matches)
        .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()))
}

pub fn find_input_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    find_device(id, Direction::Input)
}

pub fn find_output_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    find_device(id, Direction::Output)
}

/// The configured device, or the default host's default
pub(crate) fn resolve(id: Option<&DeviceId>, direction: Direction) -> AudioResult<cpal::Device> {
    match id {
        Some(id) => find_device(id, direction),
        None => default_of(&cpal::default_host(), direction)
            .ok_or(AudioError::NoDefaultDevice(direction.label())),
    }
}
