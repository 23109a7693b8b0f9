//! One-shot offline rendering: stretch, then pitch-shift, a whole clip.
//!
//! This is the non-real-time counterpart of a live session, used for
//! exporting practice versions of a track. Stretching runs first so the
//! pitch stage sees material at its final duration.

use crate::dsp::pitch::{semitones_to_ratio, GrainShifter};
use crate::dsp::stretch::stretch_clip;
use crate::dsp::vocoder::VocoderShifter;
use crate::error::Result;
use crate::types::AudioClip;

/// Which pitch shifter the render uses.
///
/// Granular is the live engine's shifter (cheap, slightly grainy);
/// the vocoder trades CPU for cleaner sustained material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PitchQuality {
    #[default]
    Granular,
    Vocoder,
}

/// Render a stretched and/or pitch-shifted copy of `clip`.
///
/// `factor` is output length over input length; `semitones` is clamped to
/// one octave either way. A unity factor skips the stretcher and a
/// near-unity pitch ratio skips the shifter, so `render_clip(c, 0.0, 1.0)`
/// is a plain copy.
pub fn render_clip(
    clip: &AudioClip,
    semitones: f32,
    factor: f64,
    quality: PitchQuality,
) -> Result<AudioClip> {
    let stretched = if (factor - 1.0).abs() > f64::EPSILON {
        stretch_clip(clip, factor)?
    } else {
        clip.clone()
    };

    let ratio = semitones_to_ratio(semitones);
    if (ratio - 1.0).abs() <= 0.01 {
        return Ok(stretched);
    }

    let shifted = match quality {
        PitchQuality::Granular => {
            let channels = (0..stretched.channel_count())
                .map(|ch| {
                    let mut shifter = GrainShifter::new();
                    shifter.set_ratio(ratio);
                    let mut samples = stretched.channel(ch).to_vec();
                    shifter.process(&mut samples);
                    samples
                })
                .collect();
            AudioClip::from_planar(channels, stretched.sample_rate())
        }
        PitchQuality::Vocoder => {
            let mut vocoder = VocoderShifter::new();
            vocoder.process_clip(&stretched, semitones)
        }
    };
    Ok(shifted)
}
