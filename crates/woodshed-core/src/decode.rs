//! Decoding file audio into clips.
//!
//! Symphonia handles the container/codec work (FLAC, MP3, WAV); the
//! decoded audio is converted to planar f32 and, when the file's rate
//! differs from the engine's, resampled with rubato so every clip entering
//! the engine shares one clock.

use std::fs::File;
use std::path::Path;

use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::DecodeError;
use crate::types::{AudioClip, Sample};

/// Input chunk size for the resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Decode a file into a clip at `target_rate`.
///
/// Decode failures surface immediately; corrupt packets inside an otherwise
/// healthy stream are skipped with a warning, which is how players survive
/// truncated downloads.
pub fn load_clip(path: &Path, target_rate: u32) -> Result<AudioClip, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Open {
        path: path.display().to_string(),
        source,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let src_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::Malformed("stream reports no sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut planar: Vec<Vec<Sample>> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut channel_count = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Malformed(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    channel_count = spec.channels.count();
                    planar = vec![Vec::new(); channel_count];
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                let buf = sample_buf.as_mut().unwrap();
                buf.copy_interleaved_ref(decoded);
                for (i, &sample) in buf.samples().iter().enumerate() {
                    planar[i % channel_count].push(sample);
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("skipping corrupt packet: {}", e);
            }
            Err(e) => return Err(DecodeError::Malformed(e.to_string())),
        }
    }

    if planar.is_empty() || planar[0].is_empty() {
        return Err(DecodeError::Malformed("stream decoded to zero frames".into()));
    }

    let frames = planar[0].len();
    log::info!(
        "decoded {}: {} channel(s), {} frames @ {}Hz",
        path.display(),
        channel_count,
        frames,
        src_rate
    );

    let planar = if src_rate != target_rate {
        log::info!("resampling {}Hz -> {}Hz", src_rate, target_rate);
        resample_planar(planar, src_rate, target_rate)?
    } else {
        planar
    };

    Ok(AudioClip::from_planar(planar, target_rate))
}

/// Resample planar audio with rubato's FFT resampler, compensating for its
/// processing delay so the output lines up with the input.
fn resample_planar(
    input: Vec<Vec<Sample>>,
    src_rate: u32,
    dst_rate: u32,
) -> Result<Vec<Vec<Sample>>, DecodeError> {
    let channels = input.len();
    let frames = input[0].len();
    let expected = (frames as f64 * dst_rate as f64 / src_rate as f64).round() as usize;

    let mut resampler =
        FftFixedIn::<f32>::new(src_rate as usize, dst_rate as usize, RESAMPLE_CHUNK, 2, channels)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
    let delay = resampler.output_delay();

    let mut out: Vec<Vec<Sample>> = vec![Vec::with_capacity(expected + delay); channels];
    let mut chunk: Vec<Vec<Sample>> = vec![vec![0.0; RESAMPLE_CHUNK]; channels];

    let mut pos = 0;
    while pos < frames {
        let n = (frames - pos).min(RESAMPLE_CHUNK);
        for ch in 0..channels {
            chunk[ch][..n].copy_from_slice(&input[ch][pos..pos + n]);
            chunk[ch][n..].fill(0.0);
        }
        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        for ch in 0..channels {
            out[ch].extend_from_slice(&processed[ch]);
        }
        pos += n;
    }

    // Flush until the delayed tail has fully emerged
    for ch in 0..channels {
        chunk[ch].fill(0.0);
    }
    let mut flushes = 0;
    while out[0].len() < expected + delay && flushes < 64 {
        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        for ch in 0..channels {
            out[ch].extend_from_slice(&processed[ch]);
        }
        flushes += 1;
    }

    for ch in &mut out {
        if ch.len() >= delay {
            ch.drain(..delay);
        }
        if ch.len() > expected {
            ch.truncate(expected);
        } else {
            ch.resize(expected, 0.0);
        }
    }
    Ok(out)
}
