//! Error types for the engine and its stages.

use thiserror::Error;

/// Errors acquiring or running a live capture source
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The platform refused access to the capture device
    #[error("Capture permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture device present
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Building the capture stream failed
    #[error("Failed to build capture stream: {0}")]
    StreamBuild(String),
}

/// Errors decoding file audio into a clip.
///
/// Decode failures are surfaced to the caller, never retried.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecognized or unsupported container format: {0}")]
    UnsupportedFormat(String),

    #[error("File contains no decodable audio track")]
    NoAudioTrack,

    #[error("Decode failed: {0}")]
    Malformed(String),

    #[error("Sample rate conversion failed: {0}")]
    Resample(String),
}

/// An internal invariant violation observed on the processing path.
///
/// Faults are fatal to the session (it should be stopped and released) but
/// never crash the host: inside the callback the chain degrades to a dry
/// passthrough instead of propagating the fault.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingFault {
    /// A stage produced NaN or infinite samples
    #[error("Processing produced non-finite samples")]
    NonFiniteOutput,

    /// A read landed outside a stage's pre-allocated buffers
    #[error("Buffer index out of range in processing stage")]
    IndexOutOfRange,
}

/// Top-level error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Audio(#[from] crate::audio::AudioError),

    /// A start was issued while a session is already processing.
    /// Transitions are serialized, never queued.
    #[error("A session is already processing; stop it before starting another")]
    AlreadyRunning,

    /// Time-stretching needs read-ahead into the source and is therefore
    /// only available for clip sessions.
    #[error("Operation is not supported for live capture sessions")]
    UnsupportedForCapture,

    #[error("Invalid stretch factor {0}; must be > 0")]
    InvalidStretchFactor(f64),

    #[error(transparent)]
    Fault(#[from] ProcessingFault),
}

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
