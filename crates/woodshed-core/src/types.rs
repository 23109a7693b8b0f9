//! Fundamental audio types shared by every stage of the engine.

use std::ops::{Index, IndexMut};
use std::sync::Arc;

/// Audio sample type used throughout the engine (32-bit float, roughly [-1, 1])
pub type Sample = f32;

/// Default sample rate the engine runs at when the device does not dictate one
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// One frame of stereo audio.
///
/// `#[repr(C)]` guarantees the [left, right] memory layout, which lets a
/// `&[StereoSample]` be reinterpreted as interleaved `&[f32]` with bytemuck
/// instead of copying frame by frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    /// Same value in both channels
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }

    /// Max of abs(left), abs(right)
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

impl std::ops::MulAssign<Sample> for StereoSample {
    #[inline]
    fn mul_assign(&mut self, factor: Sample) {
        self.left *= factor;
        self.right *= factor;
    }
}

/// A buffer of stereo frames, the interchange type on the real-time path.
///
/// Buffers on the callback path are allocated once at session start and then
/// only resized within their existing capacity.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    frames: Vec<StereoSample>,
}

impl StereoBuffer {
    /// A buffer of `len` silent frames
    pub fn silence(len: usize) -> Self {
        Self {
            frames: vec![StereoSample::default(); len],
        }
    }

    /// Build from interleaved samples [L, R, L, R, ...]
    pub fn from_interleaved(interleaved: &[Sample]) -> Self {
        assert!(interleaved.len() % 2 == 0, "interleaved length must be even");
        let frames = interleaved
            .chunks_exact(2)
            .map(|f| StereoSample::new(f[0], f[1]))
            .collect();
        Self { frames }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn fill_silence(&mut self) {
        self.frames.fill(StereoSample::default());
    }

    /// Set the working length of a pre-allocated buffer.
    ///
    /// Real-time safe as long as `len <= capacity`: growing reuses existing
    /// capacity and fills the new tail with silence, shrinking truncates
    /// without deallocating.
    #[inline]
    pub fn set_len_from_capacity(&mut self, len: usize) {
        debug_assert!(
            len <= self.frames.capacity(),
            "set_len_from_capacity beyond capacity ({} > {})",
            len,
            self.frames.capacity()
        );
        if len > self.frames.len() {
            self.frames.resize(len, StereoSample::default());
        } else {
            self.frames.truncate(len);
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.frames
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.frames
    }

    /// Zero-copy view as interleaved f32 [L, R, L, R, ...]
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.frames)
    }

    /// Zero-copy mutable view as interleaved f32
    #[inline]
    pub fn as_interleaved_mut(&mut self) -> &mut [Sample] {
        bytemuck::cast_slice_mut(&mut self.frames)
    }

    /// Multiply every frame by `factor`
    pub fn scale(&mut self, factor: Sample) {
        for frame in &mut self.frames {
            *frame *= factor;
        }
    }

    /// Peak amplitude across the buffer
    pub fn peak(&self) -> Sample {
        self.frames.iter().map(|f| f.peak()).fold(0.0, Sample::max)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StereoSample> {
        self.frames.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StereoSample> {
        self.frames.iter_mut()
    }
}

impl Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.frames[index]
    }
}

impl IndexMut<usize> for StereoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.frames[index]
    }
}

/// Decoded audio, stored planar (one `Vec<Sample>` per channel).
///
/// Clips are immutable once built: the processing stages read them and
/// produce new clips or streamed output, never writing back. Planar storage
/// keeps the per-channel time-stretch loop free of stride arithmetic.
#[derive(Debug, Clone)]
pub struct AudioClip {
    channels: Vec<Vec<Sample>>,
    sample_rate: u32,
}

impl AudioClip {
    /// Build a clip from planar channel data.
    ///
    /// Panics if `channels` is empty or the channel lengths differ.
    pub fn from_planar(channels: Vec<Vec<Sample>>, sample_rate: u32) -> Self {
        assert!(!channels.is_empty(), "clip needs at least one channel");
        let frames = channels[0].len();
        assert!(
            channels.iter().all(|c| c.len() == frames),
            "all channels must have the same length"
        );
        Self { channels, sample_rate }
    }

    /// Build a mono clip
    pub fn from_mono(samples: Vec<Sample>, sample_rate: u32) -> Self {
        Self::from_planar(vec![samples], sample_rate)
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index]
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Left channel, or the only channel for mono clips
    #[inline]
    pub fn left(&self) -> &[Sample] {
        &self.channels[0]
    }

    /// Right channel; mono clips alias the left channel
    #[inline]
    pub fn right(&self) -> &[Sample] {
        self.channels.get(1).map(Vec::as_slice).unwrap_or(&self.channels[0])
    }
}

/// Shared, immutable clip handed to the audio thread.
///
/// Plain `Arc` is fine here because clips given to a session are wrapped in
/// `basedrop::Shared` at the engine boundary; this alias is for control-side
/// consumers (decoding, offline rendering).
pub type ClipHandle = Arc<AudioClip>;

/// Playback state of a session's transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
    Paused,
}
