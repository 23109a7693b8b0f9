//! Granular pitch shifter.
//!
//! Shifts perceived pitch by resampling grains out of a ring buffer while
//! the output sample count tracks the input exactly, so duration is
//! unchanged. Two Hann-windowed grains overlap at 50%, each re-anchoring one
//! grain length behind the write position when its window wraps; 50%
//! overlapped Hann windows sum to unity, so grain edges cancel instead of
//! clicking.

use crate::dsp::ring::RingBuffer;
use crate::dsp::window::hann_window;
use crate::types::{Sample, StereoBuffer};

/// Grain length in samples (~23ms at 44.1kHz)
pub const GRAIN_SIZE: usize = 1024;

/// Ring capacity; must cover the widest read span a grain can make
/// (GRAIN_SIZE * max ratio behind the write position) with headroom.
const RING_CAPACITY: usize = 8192;

/// Semitone range the shifter accepts (one octave either way)
pub const MAX_SEMITONES: f32 = 12.0;

/// Ratios within this distance of 1.0 bypass processing entirely
const UNITY_EPSILON: f32 = 0.01;

/// Convert a semitone offset to a frequency ratio, clamping to one octave
/// either way.
#[inline]
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    let clamped = semitones.clamp(-MAX_SEMITONES, MAX_SEMITONES);
    2.0_f32.powf(clamped / 12.0)
}

/// One grain's playback cursor
#[derive(Debug, Clone, Copy)]
struct Grain {
    /// Position in the window, 0..GRAIN_SIZE
    phase: usize,
    /// Absolute fractional read position in the ring's write timeline
    read_pos: f64,
}

/// Mono granular pitch shifter.
///
/// The stereo [`PitchShifter`] owns one of these per channel; this level is
/// also the unit the DSP tests drive directly.
#[derive(Debug)]
pub struct GrainShifter {
    ring: RingBuffer,
    window: Vec<Sample>,
    grains: [Grain; 2],
    ratio: f32,
}

impl GrainShifter {
    pub fn new() -> Self {
        Self {
            ring: RingBuffer::new(RING_CAPACITY),
            window: hann_window(GRAIN_SIZE),
            // Second grain starts half a window in so the pair overlaps at 50%
            grains: [
                Grain { phase: 0, read_pos: 0.0 },
                Grain { phase: GRAIN_SIZE / 2, read_pos: 0.0 },
            ],
            ratio: 1.0,
        }
    }

    /// Current resampling ratio
    #[inline]
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Set the resampling ratio directly (clamped to 0.5..=2.0)
    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.clamp(0.5, 2.0);
    }

    /// True when the ratio is close enough to unity that processing is a
    /// straight copy.
    #[inline]
    pub fn is_bypassed(&self) -> bool {
        (self.ratio - 1.0).abs() <= UNITY_EPSILON
    }

    /// Process one sample: feed the ring, then mix the two grain readers.
    #[inline]
    pub fn process_sample(&mut self, input: Sample) -> Sample {
        self.ring.push(input);

        if self.is_bypassed() {
            // Keep grain phases frozen so re-engaging starts clean
            return input;
        }

        let mut out = 0.0;
        for grain in &mut self.grains {
            if grain.phase == 0 {
                // Re-anchor one grain behind the newest sample. The read
                // cursor advances by `ratio` per output sample while the
                // write position advances by one, so for ratio <= 2.0 the
                // cursor never overtakes the write position within a grain.
                grain.read_pos = self.ring.write_pos().saturating_sub(GRAIN_SIZE as u64) as f64;
            }
            out += self.window[grain.phase] * self.ring.read_lerp(grain.read_pos);
            grain.read_pos += self.ratio as f64;
            grain.phase = (grain.phase + 1) % GRAIN_SIZE;
        }
        out
    }

    /// Process a mono block in place. Output length equals input length.
    pub fn process(&mut self, io: &mut [Sample]) {
        for sample in io.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Drop all buffered history
    pub fn reset(&mut self) {
        self.ring.clear();
        self.grains = [
            Grain { phase: 0, read_pos: 0.0 },
            Grain { phase: GRAIN_SIZE / 2, read_pos: 0.0 },
        ];
    }
}

impl Default for GrainShifter {
    fn default() -> Self {
        Self::new()
    }
}

/// Stereo pitch shifter stage for the processing chain.
pub struct PitchShifter {
    left: GrainShifter,
    right: GrainShifter,
    semitones: f32,
}

impl PitchShifter {
    pub fn new() -> Self {
        Self {
            left: GrainShifter::new(),
            right: GrainShifter::new(),
            semitones: 0.0,
        }
    }

    /// Update the shift amount. Safe to call between blocks while the
    /// session is processing; the new ratio applies from the next sample.
    pub fn set_semitones(&mut self, semitones: f32) {
        self.semitones = semitones.clamp(-MAX_SEMITONES, MAX_SEMITONES);
        let ratio = semitones_to_ratio(self.semitones);
        self.left.set_ratio(ratio);
        self.right.set_ratio(ratio);
    }

    #[inline]
    pub fn semitones(&self) -> f32 {
        self.semitones
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.left.is_bypassed()
    }

    /// Process a stereo block in place
    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        for frame in buffer.iter_mut() {
            frame.left = self.left.process_sample(frame.left);
            frame.right = self.right.process_sample(frame.right);
        }
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

impl Default for PitchShifter {
    fn default() -> Self {
        Self::new()
    }
}
