//! Audio device enumeration and selection.
//!
//! Devices are addressed by their enumeration index; `None` selects the
//! system default, matching the configuration surface.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

use crate::error::EngineError;

/// One entry in a device listing.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

/// Resolve the capture device for an optional index.
pub fn input_device(index: Option<usize>) -> Result<Device, EngineError> {
    let host = cpal::default_host();
    match index {
        None => host
            .default_input_device()
            .ok_or_else(|| EngineError::Device("no default input device (microphone not found)".to_string())),
        Some(i) => host
            .input_devices()
            .map_err(|e| EngineError::Device(e.to_string()))?
            .nth(i)
            .ok_or_else(|| EngineError::Device(format!("input device index {i} out of range"))),
    }
}

/// Resolve the playback device for an optional index.
pub fn output_device(index: Option<usize>) -> Result<Device, EngineError> {
    let host = cpal::default_host();
    match index {
        None => host
            .default_output_device()
            .ok_or_else(|| EngineError::Device("no default output device (speakers not found)".to_string())),
        Some(i) => host
            .output_devices()
            .map_err(|e| EngineError::Device(e.to_string()))?
            .nth(i)
            .ok_or_else(|| EngineError::Device(format!("output device index {i} out of range"))),
    }
}

/// List available input devices with indices and a default marker.
pub fn list_input_devices() -> Result<Vec<DeviceInfo>, EngineError> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();
    list(
        host.input_devices()
            .map_err(|e| EngineError::Device(e.to_string()))?,
        &default_name,
    )
}

/// List available output devices with indices and a default marker.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>, EngineError> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();
    list(
        host.output_devices()
            .map_err(|e| EngineError::Device(e.to_string()))?,
        &default_name,
    )
}

fn list(devices: impl Iterator<Item = Device>, default_name: &str) -> Result<Vec<DeviceInfo>, EngineError> {
    let mut result = Vec::new();
    for (index, device) in devices.enumerate() {
        if let Ok(name) = device.name() {
            result.push(DeviceInfo {
                index,
                is_default: name == default_name,
                name,
            });
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_does_not_panic() {
        // Headless environments may report zero devices; either way the
        // enumeration itself must succeed or fail cleanly.
        let _ = list_input_devices();
        let _ = list_output_devices();
    }

    #[test]
    fn test_out_of_range_index_is_device_error() {
        if let Err(e) = input_device(Some(usize::MAX)) {
            assert!(matches!(e, EngineError::Device(_)));
        }
    }
}
