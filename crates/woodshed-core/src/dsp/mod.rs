//! Signal-processing stages: windowing, the granular and phase-vocoder
//! pitch shifters, and the WSOLA time stretcher.

pub mod pitch;
pub mod ring;
pub mod stretch;
pub mod vocoder;
pub mod window;

pub use pitch::{semitones_to_ratio, GrainShifter, PitchShifter, MAX_SEMITONES};
pub use ring::RingBuffer;
pub use stretch::{stretch_channel, stretch_clip, StretchedReader, FRAME_SIZE, HALF_FRAME};
pub use vocoder::{RustFftTransform, SpectralTransform, VocoderShifter};
pub use window::hann_window;
