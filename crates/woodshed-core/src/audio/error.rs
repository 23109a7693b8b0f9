//! Audio backend error types

use thiserror::Error;

/// Errors from the output side of the audio backend
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio output devices found")]
    NoDevices,

    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlay(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
}

/// Result type for audio backend operations
pub type AudioResult<T> = Result<T, AudioError>;
