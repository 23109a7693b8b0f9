//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};
use crate::error::CaptureError;

/// A device the UI/CLI can present for selection
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub id: DeviceId,
    pub is_default: bool,
    /// Default sample rate reported by the device, if it has one
    pub sample_rate: Option<u32>,
}

/// Enumerate output devices on the default host
pub fn output_devices() -> AudioResult<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::NoDefaultDevice(e.to_string()))?;

    let mut found = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else { continue };
        let sample_rate = device.default_output_config().ok().map(|c| c.sample_rate().0);
        found.push(AudioDevice {
            is_default: Some(&name) == default_name.as_ref(),
            id: DeviceId::new(name),
            sample_rate,
        });
    }
    if found.is_empty() {
        return Err(AudioError::NoDevices);
    }
    Ok(found)
}

/// Enumerate capture devices on the default host
pub fn capture_devices() -> AudioResult<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| AudioError::NoDefaultDevice(e.to_string()))?;

    let mut found = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else { continue };
        let sample_rate = device.default_input_config().ok().map(|c| c.sample_rate().0);
        found.push(AudioDevice {
            is_default: Some(&name) == default_name.as_ref(),
            id: DeviceId::new(name),
            sample_rate,
        });
    }
    Ok(found)
}

/// Resolve an output device by id, falling back to the system default
pub(crate) fn find_output_device(id: Option<&DeviceId>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    match id {
        Some(id) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::NoDefaultDevice(e.to_string()))?;
            for device in devices {
                if device.name().map(|n| n == id.name).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(AudioError::DeviceNotFound(id.name.clone()))
        }
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::NoDefaultDevice("no default output device".into())),
    }
}

/// Resolve a capture device by id, falling back to the system default
pub(crate) fn find_capture_device(
    id: Option<&DeviceId>,
) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match id {
        Some(id) => {
            let devices = host
                .input_devices()
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
            for device in devices {
                if device.name().map(|n| n == id.name).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(CaptureError::DeviceUnavailable(format!(
                "capture device not found: {}",
                id.name
            )))
        }
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default capture device".into())),
    }
}
