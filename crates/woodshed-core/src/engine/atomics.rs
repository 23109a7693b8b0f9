//! Lock-free session state shared between the control and audio threads.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::error::ProcessingFault;
use crate::types::PlayState;

#[inline]
fn store_f32(cell: &AtomicU32, value: f32) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

#[inline]
fn load_f32(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

/// Atomic parameter stores and telemetry for one session.
///
/// Continuous parameters (pitch, gains, stretch) travel through these cells
/// instead of the command queue: the audio thread reads them once per block,
/// the control thread overwrites them at will, and neither side ever waits.
/// Telemetry flows the other way: the callback publishes playhead, peak and
/// high-frequency energy for the control thread to read.
///
/// All accesses use `Ordering::Relaxed`; each cell is an independent value
/// and only visibility matters, not ordering between cells.
pub struct SessionAtomics {
    /// Pitch shift in semitones, written by the control thread
    pitch_semitones: AtomicU32,
    /// Master volume target in 0..=1
    volume: AtomicU32,
    /// Stretch factor (clip sessions only)
    stretch_factor: AtomicU32,
    /// Dry (unprocessed) path gain
    dry_gain: AtomicU32,
    /// Wet (processed) path gain
    wet_gain: AtomicU32,
    /// Gain target written by the feedback governor
    governor_gain: AtomicU32,
    /// Playhead in input-domain frames, written by the callback
    position: AtomicU64,
    /// Peak output level of the last block
    peak: AtomicU32,
    /// Mean-square high-frequency energy of the last block
    hf_energy: AtomicU32,
    /// PlayState discriminant
    play_state: AtomicU8,
    /// ProcessingFault discriminant + 1, 0 when healthy
    fault: AtomicU8,
    /// Set when clip playback reaches the end of the source
    ended: AtomicBool,
}

impl SessionAtomics {
    pub fn new() -> Self {
        Self {
            pitch_semitones: AtomicU32::new(0.0f32.to_bits()),
            volume: AtomicU32::new(1.0f32.to_bits()),
            stretch_factor: AtomicU32::new(1.0f32.to_bits()),
            dry_gain: AtomicU32::new(0.0f32.to_bits()),
            wet_gain: AtomicU32::new(1.0f32.to_bits()),
            governor_gain: AtomicU32::new(1.0f32.to_bits()),
            position: AtomicU64::new(0),
            peak: AtomicU32::new(0.0f32.to_bits()),
            hf_energy: AtomicU32::new(0.0f32.to_bits()),
            play_state: AtomicU8::new(PlayState::Stopped as u8),
            fault: AtomicU8::new(0),
            ended: AtomicBool::new(false),
        }
    }

    pub fn set_pitch_semitones(&self, semitones: f32) {
        store_f32(&self.pitch_semitones, semitones);
    }

    #[inline]
    pub fn pitch_semitones(&self) -> f32 {
        load_f32(&self.pitch_semitones)
    }

    pub fn set_volume(&self, gain: f32) {
        store_f32(&self.volume, gain);
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        load_f32(&self.volume)
    }

    pub fn set_stretch_factor(&self, factor: f32) {
        store_f32(&self.stretch_factor, factor);
    }

    #[inline]
    pub fn stretch_factor(&self) -> f32 {
        load_f32(&self.stretch_factor)
    }

    pub fn set_dry_gain(&self, gain: f32) {
        store_f32(&self.dry_gain, gain);
    }

    #[inline]
    pub fn dry_gain(&self) -> f32 {
        load_f32(&self.dry_gain)
    }

    pub fn set_wet_gain(&self, gain: f32) {
        store_f32(&self.wet_gain, gain);
    }

    #[inline]
    pub fn wet_gain(&self) -> f32 {
        load_f32(&self.wet_gain)
    }

    pub fn set_governor_gain(&self, gain: f32) {
        store_f32(&self.governor_gain, gain);
    }

    #[inline]
    pub fn governor_gain(&self) -> f32 {
        load_f32(&self.governor_gain)
    }

    pub fn set_position(&self, frames: u64) {
        self.position.store(frames, Ordering::Relaxed);
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn set_peak(&self, level: f32) {
        store_f32(&self.peak, level);
    }

    #[inline]
    pub fn peak(&self) -> f32 {
        load_f32(&self.peak)
    }

    pub fn set_hf_energy(&self, energy: f32) {
        store_f32(&self.hf_energy, energy);
    }

    #[inline]
    pub fn hf_energy(&self) -> f32 {
        load_f32(&self.hf_energy)
    }

    pub fn set_play_state(&self, state: PlayState) {
        self.play_state.store(state as u8, Ordering::Relaxed);
    }

    #[inline]
    pub fn play_state(&self) -> PlayState {
        match self.play_state.load(Ordering::Relaxed) {
            1 => PlayState::Playing,
            2 => PlayState::Paused,
            _ => PlayState::Stopped,
        }
    }

    /// Record a fault; the first fault wins so the report is stable.
    pub fn raise_fault(&self, fault: ProcessingFault) {
        let code = match fault {
            ProcessingFault::NonFiniteOutput => 1,
            ProcessingFault::IndexOutOfRange => 2,
        };
        let _ = self
            .fault
            .compare_exchange(0, code, Ordering::Relaxed, Ordering::Relaxed);
    }

    #[inline]
    pub fn fault(&self) -> Option<ProcessingFault> {
        match self.fault.load(Ordering::Relaxed) {
            1 => Some(ProcessingFault::NonFiniteOutput),
            2 => Some(ProcessingFault::IndexOutOfRange),
            _ => None,
        }
    }

    pub fn set_ended(&self, ended: bool) {
        self.ended.store(ended, Ordering::Relaxed);
    }

    #[inline]
    pub fn ended(&self) -> bool {
        self.ended.load(Ordering::Relaxed)
    }
}

impl Default for SessionAtomics {
    fn default() -> Self {
        Self::new()
    }
}
