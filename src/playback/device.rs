//! # Output Device Selection
//!
//! Resolves the configured output device against the host's device list.
//! A selector is either a position in that list or an exact device name;
//! no selector means the host default.

use super::PlaybackError;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::cpal::{default_host, Device};
use tracing::{debug, info};

/// How the user picked an output device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Position in the host's output device list
    Index(usize),
    /// Exact device name as reported by the host
    Name(String),
}

impl std::str::FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty device selector".to_string());
        }
        match s.parse::<usize>() {
            Ok(index) => Ok(DeviceSelector::Index(index)),
            Err(_) => Ok(DeviceSelector::Name(s.to_string())),
        }
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Index(index) => write!(f, "#{}", index),
            DeviceSelector::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// Parse an optional configured value; blank values mean "use the default".
pub fn selector_from_config(value: Option<&str>) -> Result<Option<DeviceSelector>, PlaybackError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(PlaybackError::Device),
    }
}

/// Pick the position in `names` matching `selector`.
pub fn match_device(names: &[String], selector: &DeviceSelector) -> Option<usize> {
    match selector {
        DeviceSelector::Index(index) if *index < names.len() => Some(*index),
        DeviceSelector::Index(_) => None,
        DeviceSelector::Name(name) => names.iter().position(|n| n == name),
    }
}

/// Find the output device for `selector` on the default host.
pub fn find_output_device(selector: &DeviceSelector) -> Result<Device, PlaybackError> {
    let host = default_host();
    let devices: Vec<Device> = host
        .output_devices()
        .map_err(|e| PlaybackError::Device(format!("Failed to enumerate devices: {}", e)))?
        .collect();
    let names: Vec<String> = devices
        .iter()
        .map(|d| d.name().unwrap_or_default())
        .collect();

    debug!(count = devices.len(), selector = %selector, "Resolving output device");

    let index = match_device(&names, selector)
        .ok_or_else(|| PlaybackError::Device(format!("Output device {} not found", selector)))?;
    info!(index, name = %names[index], "Using output device");

    devices
        .into_iter()
        .nth(index)
        .ok_or_else(|| PlaybackError::Device(format!("Output device {} not found", selector)))
}

/// `index: name` for every output device on the default host.
pub fn list_output_devices() -> Result<Vec<(usize, String)>, PlaybackError> {
    let host = default_host();
    let devices = host
        .output_devices()
        .map_err(|e| PlaybackError::Device(format!("Failed to enumerate devices: {}", e)))?;

    Ok(devices
        .enumerate()
        .map(|(index, device)| (index, device.name().unwrap_or_else(|_| "Unknown".to_string())))
        .collect())
}
