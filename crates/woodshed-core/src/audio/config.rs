//! Audio backend configuration

use serde::{Deserialize, Serialize};

/// Default buffer size when no preference is specified (frames).
/// 512 frames is a safe default on most systems (~11.6ms at 44.1kHz).
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Preferred buffer size for the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Let the system choose
    #[default]
    Default,
    /// Request a specific frame count (the device may adjust it)
    Fixed(u32),
}

impl BufferSize {
    /// Frames to request, or None for the system default
    pub fn as_frames(&self) -> Option<u32> {
        match self {
            BufferSize::Default => None,
            BufferSize::Fixed(frames) => Some(*frames),
        }
    }
}

/// Audio device identifier, matched against the name the system reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub name: String,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Configuration for the audio backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device (None = system default)
    pub output_device: Option<DeviceId>,

    /// Capture device for live sessions (None = system default)
    pub capture_device: Option<DeviceId>,

    /// Preferred output buffer size
    pub buffer_size: BufferSize,

    /// Preferred sample rate (None = device default)
    pub sample_rate: Option<u32>,
}

impl AudioConfig {
    pub fn with_output_device(mut self, device: DeviceId) -> Self {
        self.output_device = Some(device);
        self
    }

    pub fn with_capture_device(mut self, device: DeviceId) -> Self {
        self.capture_device = Some(device);
        self
    }

    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_size = BufferSize::Fixed(frames);
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_frames() {
        assert_eq!(BufferSize::Default.as_frames(), None);
        assert_eq!(BufferSize::Fixed(256).as_frames(), Some(256));
    }

    #[test]
    fn builder_chains() {
        let config = AudioConfig::default()
            .with_output_device(DeviceId::new("Scarlett"))
            .with_buffer_frames(256)
            .with_sample_rate(48000);
        assert_eq!(config.output_device.as_ref().unwrap().name, "Scarlett");
        assert_eq!(config.buffer_size, BufferSize::Fixed(256));
        assert_eq!(config.sample_rate, Some(48000));
    }

    #[test]
    fn yaml_round_trip() {
        let config = AudioConfig::default().with_buffer_frames(128);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: AudioConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.buffer_size, BufferSize::Fixed(128));
    }
}
