//! CPAL stream construction.
//!
//! The output stream owns the session's [`ProcessChain`] exclusively: the
//! chain moves into the callback closure, so the real-time path needs no
//! lock of any kind. Capture streams only push interleaved samples into an
//! SPSC ring the output callback drains.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use super::config::{AudioConfig, DEFAULT_BUFFER_SIZE};
use super::error::{AudioError, AudioResult};
use crate::engine::chain::ProcessChain;
use crate::error::CaptureError;

/// Open streams for one session. Dropping this stops the callbacks.
pub struct StreamHandle {
    output: Option<Stream>,
    capture: Option<Stream>,
    sample_rate: u32,
    buffer_frames: u32,
}

impl StreamHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_frames as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Pause both callbacks, then drop the streams. After this returns no
    /// callback runs again, so chain state can be considered released.
    pub(crate) fn shutdown(&mut self) {
        if let Some(stream) = &self.capture {
            let _ = stream.pause();
        }
        if let Some(stream) = &self.output {
            let _ = stream.pause();
        }
        self.capture = None;
        self.output = None;
    }
}

/// Negotiate the output stream configuration for a device.
///
/// Forces stereo, honors the configured sample rate when the device's
/// default already matches it, and applies the requested buffer size.
pub(crate) fn negotiated_output_config(
    device: &cpal::Device,
    config: &AudioConfig,
) -> AudioResult<(StreamConfig, u32)> {
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    if supported.sample_format() != SampleFormat::F32 {
        return Err(AudioError::UnsupportedFormat(format!(
            "{:?}",
            supported.sample_format()
        )));
    }
    if supported.channels() < 2 {
        return Err(AudioError::UnsupportedFormat(format!(
            "need stereo output, device reports {} channel(s)",
            supported.channels()
        )));
    }

    let sample_rate = config.sample_rate.unwrap_or(supported.sample_rate().0);
    let buffer_frames = config.buffer_size.as_frames().unwrap_or(DEFAULT_BUFFER_SIZE);

    let stream_config = StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: CpalBufferSize::Fixed(buffer_frames),
    };
    Ok((stream_config, buffer_frames))
}

/// Build and start the output stream around a processing chain.
pub(crate) fn start_output_stream(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    mut chain: ProcessChain,
) -> AudioResult<StreamHandle> {
    let device_name = device.name().unwrap_or_else(|_| "unknown".into());
    log::info!(
        "output stream: {} @ {}Hz, {:?} frames",
        device_name,
        stream_config.sample_rate.0,
        stream_config.buffer_size
    );

    let stream = device
        .build_output_stream(
            stream_config,
            move |data: &mut [f32], _| chain.render(data),
            |err| log::error!("output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlay(e.to_string()))?;

    let buffer_frames = match stream_config.buffer_size {
        CpalBufferSize::Fixed(frames) => frames,
        CpalBufferSize::Default => DEFAULT_BUFFER_SIZE,
    };

    Ok(StreamHandle {
        output: Some(stream),
        capture: None,
        sample_rate: stream_config.sample_rate.0,
        buffer_frames,
    })
}

/// Build and start a capture stream feeding the given SPSC producer with
/// interleaved stereo samples. Mono capture devices are duplicated to both
/// channels; wider devices contribute their first two.
pub(crate) fn start_capture_stream(
    device: &cpal::Device,
    handle: &mut StreamHandle,
    mut producer: rtrb::Producer<f32>,
) -> Result<(), CaptureError> {
    let supported = device
        .default_input_config()
        .map_err(|e| classify_capture_error(&e.to_string()))?;

    if supported.sample_format() != SampleFormat::F32 {
        return Err(CaptureError::StreamBuild(format!(
            "unsupported capture sample format {:?}",
            supported.sample_format()
        )));
    }

    let channels = supported.channels() as usize;
    let stream_config: StreamConfig = supported.into();
    let device_name = device.name().unwrap_or_else(|_| "unknown".into());
    log::info!(
        "capture stream: {} @ {}Hz, {} channel(s)",
        device_name,
        stream_config.sample_rate.0,
        channels
    );

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _| {
                // Overflow drops samples; the output side will read silence
                // and the governor/monitor side copes. Never block here.
                for frame in data.chunks(channels.max(1)) {
                    let left = frame.first().copied().unwrap_or(0.0);
                    let right = frame.get(1).copied().unwrap_or(left);
                    if producer.push(left).is_err() {
                        break;
                    }
                    if producer.push(right).is_err() {
                        break;
                    }
                }
            },
            |err| log::error!("capture stream error: {}", err),
            None,
        )
        .map_err(|e| classify_capture_error(&e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::StreamBuild(e.to_string()))?;

    handle.capture = Some(stream);
    Ok(())
}

/// Map backend error text onto the capture error taxonomy. CPAL does not
/// expose permission failures as a dedicated variant, so this goes by the
/// message.
fn classify_capture_error(message: &str) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("access") {
        CaptureError::PermissionDenied(message.to_string())
    } else if lower.contains("no device") || lower.contains("not available") {
        CaptureError::DeviceUnavailable(message.to_string())
    } else {
        CaptureError::StreamBuild(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_error_classification() {
        assert!(matches!(
            classify_capture_error("Operation not permitted: permission denied"),
            CaptureError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_capture_error("the requested device is not available"),
            CaptureError::DeviceUnavailable(_)
        ));
        assert!(matches!(
            classify_capture_error("ALSA function snd_pcm_open failed"),
            CaptureError::StreamBuild(_)
        ));
    }
}
