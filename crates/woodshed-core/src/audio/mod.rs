//! Cross-platform audio backend (CPAL).
//!
//! Lock-free by construction: the output stream owns the session's
//! processing chain, the control thread talks to it through atomics and an
//! SPSC command queue, and capture audio crosses threads through an SPSC
//! sample ring. No mutex is ever taken on the callback path.

mod backend;
mod config;
mod device;
mod error;

pub use backend::StreamHandle;
pub use config::{AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE};
pub use device::{capture_devices, output_devices, AudioDevice};
pub use error::{AudioError, AudioResult};

pub(crate) use backend::{negotiated_output_config, start_capture_stream, start_output_stream};
pub(crate) use device::{find_capture_device, find_output_device};
