//! WSOLA time stretcher.
//!
//! Changes duration by a stretch factor while preserving pitch: for each
//! output frame, the best-correlated input frame within a search window
//! around the ideal (time-scaled) position is overlap-added onto the output
//! with a linear cross-fade. [`stretch_clip`] is the one-shot form;
//! [`StretchedReader`] runs the same loop incrementally against a complete
//! in-memory clip to drive live playback.

use std::ops::Deref;

use crate::error::{EngineError, Result};
use crate::types::{AudioClip, Sample, StereoBuffer};

/// Analysis/synthesis frame length
pub const FRAME_SIZE: usize = 1024;

/// Overlap region and per-iteration cursor advance
pub const HALF_FRAME: usize = FRAME_SIZE / 2;

/// Guard against division by zero in the correlation normalization
const CORRELATION_EPSILON: f64 = 1e-10;

/// Stretch every channel of a clip by `factor` (output length / input
/// length). Channels are processed independently with identical parameters.
///
/// `factor` must be > 0. Values far outside 0.5..=2.0 are accepted but cost
/// proportionally more search work; callers clamp to a musically sane range.
pub fn stretch_clip(clip: &AudioClip, factor: f64) -> Result<AudioClip> {
    if !(factor > 0.0) || !factor.is_finite() {
        return Err(EngineError::InvalidStretchFactor(factor));
    }
    let channels = (0..clip.channel_count())
        .map(|ch| stretch_channel(clip.channel(ch), factor))
        .collect();
    Ok(AudioClip::from_planar(channels, clip.sample_rate()))
}

/// Stretch one mono channel. Output length is `round(input.len() * factor)`
/// and every output sample is written.
pub fn stretch_channel(input: &[Sample], factor: f64) -> Vec<Sample> {
    let out_len = (input.len() as f64 * factor).round() as usize;
    if input.len() < FRAME_SIZE || out_len <= FRAME_SIZE {
        // Too short for overlap-add; nearest-sample copy keeps the length
        // contract without a seed frame to correlate against.
        return (0..out_len)
            .map(|j| {
                let src = ((j as f64 / factor) as usize).min(input.len().saturating_sub(1));
                input[src]
            })
            .collect();
    }

    let mut output = vec![0.0; out_len];

    // Seed: the first frame is copied verbatim, giving the search loop an
    // output tail to correlate against.
    output[..FRAME_SIZE].copy_from_slice(&input[..FRAME_SIZE]);

    let mut cursor = HALF_FRAME;
    while cursor + FRAME_SIZE <= out_len {
        let ideal = cursor as f64 / factor;
        let best = best_offset(&output[cursor..cursor + HALF_FRAME], input, ideal);

        // Cross-fade the overlap region, then copy the second half directly;
        // the direct copy is what guarantees the output has no zero gaps.
        for i in 0..HALF_FRAME {
            let fade_in = i as f32 / HALF_FRAME as f32;
            let fade_out = 1.0 - fade_in;
            output[cursor + i] = output[cursor + i] * fade_out + input[best + i] * fade_in;
        }
        output[cursor + HALF_FRAME..cursor + FRAME_SIZE]
            .copy_from_slice(&input[best + HALF_FRAME..best + FRAME_SIZE]);

        cursor += HALF_FRAME;
    }

    // The loop leaves at most half a frame unwritten at the very end; fill
    // it by direct time-scaled copy so the populated-output guarantee holds.
    for j in (cursor + HALF_FRAME).min(out_len)..out_len {
        let src = ((j as f64 / factor) as usize).min(input.len() - 1);
        output[j] = input[src];
    }

    output
}

/// Find the input offset whose frame correlates best with `tail`.
///
/// Scans candidate start positions in `ideal ± HALF_FRAME` (clamped to the
/// input), low to high, keeping the first strictly-greater score, so the
/// selection is deterministic and ties break to the lowest offset.
fn best_offset(tail: &[Sample], input: &[Sample], ideal: f64) -> usize {
    let max_start = input.len() - FRAME_SIZE;
    let center = ideal.round() as i64;
    // Extreme factors can push the ideal position past the last valid
    // frame start; clamping keeps every candidate readable.
    let lo = ((center - HALF_FRAME as i64).max(0) as usize).min(max_start);
    let hi = ((center + HALF_FRAME as i64) as usize).min(max_start);

    let mut best = lo;
    let mut best_score = f64::NEG_INFINITY;
    for cand in lo..=hi {
        let score = normalized_correlation(tail, &input[cand..cand + HALF_FRAME]);
        if score > best_score {
            best_score = score;
            best = cand;
        }
    }
    best
}

/// `Σ(a·b) / sqrt(Σa²·Σb² + ε)`
#[inline]
fn normalized_correlation(a: &[Sample], b: &[Sample]) -> f64 {
    let mut dot = 0.0f64;
    let mut energy_a = 0.0f64;
    let mut energy_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        energy_a += x as f64 * x as f64;
        energy_b += y as f64 * y as f64;
    }
    dot / (energy_a * energy_b + CORRELATION_EPSILON).sqrt()
}

/// Streaming WSOLA playback over a complete in-memory clip.
///
/// Each generation step emits `HALF_FRAME` frames: the cross-faded overlap
/// of the previous frame's tail with the best-correlated input frame around
/// the current time-scaled position. The stretch factor is re-read every
/// step, so live changes take effect within half a frame. All buffers are
/// allocated at construction; `fill` never allocates.
///
/// Generic over the clip pointer so the audio thread can hold a
/// `basedrop::Shared<AudioClip>` while tests use `Arc` or `&AudioClip`.
pub struct StretchedReader<C: Deref<Target = AudioClip>> {
    clip: C,
    factor: f64,
    /// Ideal input-domain position of the next search, in frames
    input_pos: f64,
    /// Per-channel overlap tails (left, right)
    tails: [Vec<Sample>; 2],
    /// Generated frames waiting to be consumed
    staged: StereoBuffer,
    staged_read: usize,
    seeded: bool,
    finished: bool,
}

impl<C: Deref<Target = AudioClip>> StretchedReader<C> {
    pub fn new(clip: C) -> Self {
        Self {
            clip,
            factor: 1.0,
            input_pos: 0.0,
            tails: [vec![0.0; HALF_FRAME], vec![0.0; HALF_FRAME]],
            staged: StereoBuffer::silence(HALF_FRAME),
            staged_read: HALF_FRAME, // empty until the first generation step
            seeded: false,
            finished: false,
        }
    }

    /// Set the stretch factor; applies from the next generation step.
    pub fn set_factor(&mut self, factor: f64) {
        self.factor = if factor.is_finite() { factor.max(1e-3) } else { 1.0 };
    }

    #[inline]
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Current position in the input (source) timeline, in frames
    #[inline]
    pub fn position(&self) -> f64 {
        self.input_pos
    }

    /// True once the reader has emitted the end of the clip
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Swap the underlying clip and rewind. Reuses the reader's buffers, so
    /// it is safe to call from the audio thread; the old clip pointer drops
    /// here and its deallocation is the pointer type's concern.
    pub fn replace_clip(&mut self, clip: C) {
        self.clip = clip;
        self.input_pos = 0.0;
        self.seeded = false;
        self.finished = false;
        self.staged_read = HALF_FRAME;
    }

    /// Jump to an input-domain frame and re-seed the overlap state there.
    pub fn seek(&mut self, frame: usize) {
        self.input_pos = frame.min(self.clip.frames()) as f64;
        self.seeded = false;
        self.finished = false;
        self.staged_read = HALF_FRAME;
    }

    /// Fill `out` with stretched audio. Returns the number of frames
    /// produced; anything past that is silence (end of clip).
    pub fn fill(&mut self, out: &mut StereoBuffer) -> usize {
        let len = out.len();
        let mut produced = 0;
        while produced < len {
            if self.staged_read == HALF_FRAME {
                if self.finished || !self.generate() {
                    break;
                }
            }
            let take = (HALF_FRAME - self.staged_read).min(len - produced);
            for i in 0..take {
                out.as_mut_slice()[produced + i] = self.staged[self.staged_read + i];
            }
            self.staged_read += take;
            produced += take;
        }
        for frame in out.as_mut_slice()[produced..].iter_mut() {
            *frame = Default::default();
        }
        produced
    }

    /// Produce the next `HALF_FRAME` frames into the staging buffer.
    /// Returns false when the clip is exhausted.
    fn generate(&mut self) -> bool {
        let frames = self.clip.frames();
        if frames < FRAME_SIZE {
            self.finished = true;
            return false;
        }

        if !self.seeded {
            // Seed at the current position: emit the first half frame
            // verbatim and keep the second half as the overlap tail.
            let start = (self.input_pos as usize).min(frames - FRAME_SIZE);
            let (left, right) = (self.clip.left(), self.clip.right());
            for i in 0..HALF_FRAME {
                self.staged[i].left = left[start + i];
                self.staged[i].right = right[start + i];
                self.tails[0][i] = left[start + HALF_FRAME + i];
                self.tails[1][i] = right[start + HALF_FRAME + i];
            }
            self.input_pos = start as f64 + HALF_FRAME as f64 / self.factor;
            self.staged_read = 0;
            self.seeded = true;
            return true;
        }

        if self.input_pos + FRAME_SIZE as f64 > frames as f64 {
            // Flush the remaining tail so the final overlap region is heard,
            // then report exhaustion.
            for i in 0..HALF_FRAME {
                self.staged[i].left = self.tails[0][i];
                self.staged[i].right = self.tails[1][i];
            }
            self.staged_read = 0;
            self.finished = true;
            return true;
        }

        // Channels search independently with identical parameters.
        for (ch, data) in [self.clip.left(), self.clip.right()].into_iter().enumerate() {
            let best = best_offset(&self.tails[ch], data, self.input_pos);
            for i in 0..HALF_FRAME {
                let fade_in = i as f32 / HALF_FRAME as f32;
                let mixed = self.tails[ch][i] * (1.0 - fade_in) + data[best + i] * fade_in;
                if ch == 0 {
                    self.staged[i].left = mixed;
                } else {
                    self.staged[i].right = mixed;
                }
            }
            self.tails[ch].copy_from_slice(&data[best + HALF_FRAME..best + FRAME_SIZE]);
        }

        self.input_pos += HALF_FRAME as f64 / self.factor;
        self.staged_read = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (std::f32::consts::TAU * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn output_length_is_rounded_product() {
        let input = sine(440.0, 44100, 44100);
        for factor in [0.5, 0.75, 1.0, 1.37, 1.5, 2.0] {
            let out = stretch_channel(&input, factor);
            let expected = (input.len() as f64 * factor).round() as usize;
            assert_eq!(out.len(), expected, "factor {}", factor);
        }
    }

    #[test]
    fn extreme_factors_hold_the_length_contract() {
        // Outside the musically sane range the quality degrades, but the
        // length contract and memory safety still hold.
        let input = sine(440.0, 44100, 20000);
        for factor in [0.2, 3.0, 5.0] {
            let out = stretch_channel(&input, factor);
            let expected = (input.len() as f64 * factor).round() as usize;
            assert_eq!(out.len(), expected, "factor {}", factor);
            assert!(out.iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn rejects_nonpositive_factor() {
        let clip = AudioClip::from_mono(sine(440.0, 44100, 8192), 44100);
        assert!(matches!(
            stretch_clip(&clip, 0.0),
            Err(EngineError::InvalidStretchFactor(_))
        ));
        assert!(matches!(
            stretch_clip(&clip, -1.5),
            Err(EngineError::InvalidStretchFactor(_))
        ));
        assert!(matches!(
            stretch_clip(&clip, f64::NAN),
            Err(EngineError::InvalidStretchFactor(_))
        ));
    }

    #[test]
    fn every_output_sample_is_written() {
        // A DC signal makes unwritten (zero) samples stand out: every
        // cross-fade and copy of 1.0 with 1.0 stays 1.0.
        let input = vec![1.0f32; 20000];
        for factor in [0.6, 1.0, 1.4] {
            let out = stretch_channel(&input, factor);
            for (i, &s) in out.iter().enumerate() {
                assert!(
                    (s - 1.0).abs() < 1e-3,
                    "factor {}: sample {} = {} (gap?)",
                    factor,
                    i,
                    s
                );
            }
        }
    }

    #[test]
    fn selection_is_deterministic() {
        let input = sine(330.0, 44100, 30000);
        let a = stretch_channel(&input, 1.33);
        let b = stretch_channel(&input, 1.33);
        assert_eq!(a, b);
    }

    #[test]
    fn stretch_preserves_pitch() {
        use rustfft::{num_complex::Complex, FftPlanner};

        let sample_rate = 44100;
        let input = sine(440.0, sample_rate, sample_rate as usize);
        let out = stretch_channel(&input, 1.5);

        let n = 16384;
        let start = (out.len() - n) / 2;
        let mut buf: Vec<Complex<f32>> = out[start..start + n]
            .iter()
            .map(|&s| Complex::new(s, 0.0))
            .collect();
        FftPlanner::new().plan_fft_forward(n).process(&mut buf);
        let peak = (1..n / 2)
            .max_by(|&a, &b| buf[a].norm().total_cmp(&buf[b].norm()))
            .unwrap();
        let peak_hz = peak as f32 * sample_rate as f32 / n as f32;
        assert!(
            (peak_hz - 440.0).abs() < 440.0 * 0.05,
            "pitch moved to {} Hz",
            peak_hz
        );
    }

    #[test]
    fn two_second_clip_times_one_point_five() {
        let sample_rate = 44100u32;
        let clip = AudioClip::from_planar(
            vec![
                sine(440.0, sample_rate, 2 * sample_rate as usize),
                sine(660.0, sample_rate, 2 * sample_rate as usize),
            ],
            sample_rate,
        );
        let out = stretch_clip(&clip, 1.5).unwrap();
        assert_eq!(out.frames(), 3 * sample_rate as usize);
        for ch in 0..2 {
            for &s in out.channel(ch) {
                assert!(s.is_finite());
                assert!(s.abs() <= 1.5, "sample out of range: {}", s);
            }
        }
    }

    #[test]
    fn reader_produces_scaled_length() {
        let sample_rate = 44100;
        let clip = Arc::new(AudioClip::from_mono(
            sine(440.0, sample_rate, sample_rate as usize),
            sample_rate,
        ));
        let mut reader = StretchedReader::new(Arc::clone(&clip));
        reader.set_factor(1.5);

        let mut block = StereoBuffer::silence(256);
        let mut total = 0usize;
        loop {
            let produced = reader.fill(&mut block);
            total += produced;
            if produced < block.len() {
                break;
            }
            assert!(total < sample_rate as usize * 4, "reader never finished");
        }

        let expected = (clip.frames() as f64 * 1.5) as usize;
        // The streaming form stops once the search window hits the clip end,
        // so it comes up at most one frame short of the one-shot length.
        assert!(
            (total as i64 - expected as i64).unsigned_abs() < FRAME_SIZE as u64 * 2,
            "total {} vs expected {}",
            total,
            expected
        );
    }

    #[test]
    fn reader_factor_change_mid_stream() {
        let clip = Arc::new(AudioClip::from_mono(sine(220.0, 44100, 44100), 44100));
        let mut reader = StretchedReader::new(clip);
        reader.set_factor(1.0);

        let mut block = StereoBuffer::silence(512);
        for _ in 0..8 {
            reader.fill(&mut block);
        }
        let pos_before = reader.position();
        reader.set_factor(2.0);
        for _ in 0..8 {
            reader.fill(&mut block);
        }
        // Slower factor advances the input position more slowly
        let advance = reader.position() - pos_before;
        assert!(advance > 0.0 && advance < 4096.0 + FRAME_SIZE as f64);
        assert!(!reader.is_finished());
    }

    #[test]
    fn reader_seek_resets_state() {
        let clip = Arc::new(AudioClip::from_mono(sine(440.0, 44100, 44100), 44100));
        let mut reader = StretchedReader::new(clip);
        let mut block = StereoBuffer::silence(1024);
        reader.fill(&mut block);
        reader.seek(22050);
        assert!((reader.position() - 22050.0).abs() < 1.0);
        let produced = reader.fill(&mut block);
        assert_eq!(produced, 1024);
        assert!(!reader.is_finished());
    }
}
