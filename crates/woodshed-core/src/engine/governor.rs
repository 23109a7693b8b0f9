//! Acoustic feedback governor.
//!
//! When the session input is a live capture of loopback audio, a
//! processing-gain increase can close an acoustic loop: output leaks back
//! into the capture, builds up, and screams. Runaway feedback shows up as
//! sustained broadband energy above the musical content, so the defense is
//! a heuristic: watch high-frequency energy, and if it stays elevated
//! across several consecutive measurement windows, ramp the output down
//! until it calms, then ramp back up.
//!
//! Division of labor (the callback must never block or branch on timers):
//! - [`HighpassEnergy`] runs inside the audio callback (a one-pole
//!   high-pass and a mean-square, pure array arithmetic) and publishes one
//!   number per block through the session atomics.
//! - [`GovernorState`] runs on the control thread at a timer cadence and
//!   only flips gain *targets*; the actual ramp is the chain's smoothed
//!   gain stage, so recoveries and ducks are exponential, never steps.
//!
//! Every threshold lives in [`GovernorConfig`]; the defaults are starting
//! points, not constants of nature.

use serde::{Deserialize, Serialize};

use crate::types::{Sample, StereoBuffer};

/// Tunable thresholds for the feedback governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// High-pass corner isolating the band watched for feedback (Hz)
    pub highpass_hz: f32,
    /// Mean-square energy above this (dBFS) counts as an elevated window
    pub threshold_db: f32,
    /// Consecutive elevated windows before the governor ducks
    pub trigger_windows: u32,
    /// Consecutive quiet windows before the governor releases
    pub release_windows: u32,
    /// Gain applied while ducked (dB, negative)
    pub duck_db: f32,
    /// Time constant of the duck/release ramp (ms)
    pub ramp_ms: f32,
    /// Measurement window / monitor tick interval (ms)
    pub interval_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            highpass_hz: 4000.0,
            threshold_db: -30.0,
            trigger_windows: 6,
            release_windows: 20,
            duck_db: -24.0,
            ramp_ms: 80.0,
            interval_ms: 50,
        }
    }
}

impl GovernorConfig {
    /// Duck gain as a linear factor
    pub fn duck_gain(&self) -> f32 {
        10.0_f32.powf(self.duck_db / 20.0)
    }
}

/// Hysteresis state machine, driven once per monitor tick.
pub struct GovernorState {
    config: GovernorConfig,
    elevated: u32,
    quiet: u32,
    ducked: bool,
}

impl GovernorState {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            elevated: 0,
            quiet: 0,
            ducked: false,
        }
    }

    #[inline]
    pub fn is_ducked(&self) -> bool {
        self.ducked
    }

    /// Feed one measurement window's mean-square energy. Returns the new
    /// gain target when the state flips, `None` while it holds.
    pub fn update(&mut self, energy: f32) -> Option<f32> {
        let energy_db = 10.0 * energy.max(1e-12).log10();

        if energy_db > self.config.threshold_db {
            self.elevated += 1;
            self.quiet = 0;
            if !self.ducked && self.elevated >= self.config.trigger_windows {
                self.ducked = true;
                return Some(self.config.duck_gain());
            }
        } else {
            self.quiet += 1;
            self.elevated = 0;
            if self.ducked && self.quiet >= self.config.release_windows {
                self.ducked = false;
                return Some(1.0);
            }
        }
        None
    }
}

/// High-frequency energy meter for the audio callback.
///
/// One-pole high-pass per channel, then the mean square of the residual
/// over the block. No allocation, no branching on shared state.
pub struct HighpassEnergy {
    /// Low-pass coefficient; the high-pass output is input minus low-pass
    alpha: f32,
    lp_left: Sample,
    lp_right: Sample,
}

impl HighpassEnergy {
    pub fn new(sample_rate: u32, corner_hz: f32) -> Self {
        let alpha = 1.0 - (-std::f32::consts::TAU * corner_hz / sample_rate as f32).exp();
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            lp_left: 0.0,
            lp_right: 0.0,
        }
    }

    /// Mean-square high-frequency energy of the block
    pub fn measure(&mut self, buffer: &StereoBuffer) -> f32 {
        if buffer.is_empty() {
            return 0.0;
        }
        let mut acc = 0.0f64;
        for frame in buffer.iter() {
            self.lp_left += self.alpha * (frame.left - self.lp_left);
            self.lp_right += self.alpha * (frame.right - self.lp_right);
            let hf_l = frame.left - self.lp_left;
            let hf_r = frame.right - self.lp_right;
            acc += (hf_l * hf_l + hf_r * hf_r) as f64;
        }
        (acc / (buffer.len() * 2) as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    fn loud() -> f32 {
        // -10 dBFS mean square, well above the -30 default threshold
        0.1
    }

    fn quiet() -> f32 {
        // -60 dBFS
        1e-6
    }

    #[test]
    fn ducks_after_sustained_elevation() {
        let config = GovernorConfig::default();
        let trigger = config.trigger_windows;
        let mut gov = GovernorState::new(config.clone());

        for i in 0..trigger - 1 {
            assert_eq!(gov.update(loud()), None, "window {}", i);
        }
        let action = gov.update(loud());
        assert_eq!(action, Some(config.duck_gain()));
        assert!(gov.is_ducked());

        // Holding loud does not re-trigger
        assert_eq!(gov.update(loud()), None);
    }

    #[test]
    fn short_burst_does_not_duck() {
        let mut gov = GovernorState::new(GovernorConfig::default());
        for _ in 0..3 {
            assert_eq!(gov.update(loud()), None);
        }
        // A quiet window resets the hysteresis counter
        assert_eq!(gov.update(quiet()), None);
        for _ in 0..3 {
            assert_eq!(gov.update(loud()), None);
        }
        assert!(!gov.is_ducked());
    }

    #[test]
    fn releases_after_recovery_period() {
        let config = GovernorConfig::default();
        let mut gov = GovernorState::new(config.clone());

        for _ in 0..config.trigger_windows {
            gov.update(loud());
        }
        assert!(gov.is_ducked());

        for i in 0..config.release_windows - 1 {
            assert_eq!(gov.update(quiet()), None, "window {}", i);
        }
        assert_eq!(gov.update(quiet()), Some(1.0));
        assert!(!gov.is_ducked());
    }

    #[test]
    fn highpass_passes_hiss_blocks_rumble() {
        let sample_rate = 44100u32;
        let mut meter = HighpassEnergy::new(sample_rate, 4000.0);

        // 8 kHz tone: mostly above the corner
        let mut high = StereoBuffer::silence(4096);
        for (i, frame) in high.iter_mut().enumerate() {
            let s = (std::f32::consts::TAU * 8000.0 * i as f32 / sample_rate as f32).sin() * 0.5;
            *frame = StereoSample::mono(s);
        }
        let high_energy = meter.measure(&high);

        // 100 Hz tone at the same level: mostly below the corner
        let mut meter = HighpassEnergy::new(sample_rate, 4000.0);
        let mut low = StereoBuffer::silence(4096);
        for (i, frame) in low.iter_mut().enumerate() {
            let s = (std::f32::consts::TAU * 100.0 * i as f32 / sample_rate as f32).sin() * 0.5;
            *frame = StereoSample::mono(s);
        }
        let low_energy = meter.measure(&low);

        assert!(
            high_energy > low_energy * 10.0,
            "high {} vs low {}",
            high_energy,
            low_energy
        );
    }

    #[test]
    fn end_to_end_duck_and_release_with_meter() {
        // Synthetic feedback scenario: sustained 8 kHz screech, then quiet.
        let sample_rate = 44100u32;
        let config = GovernorConfig::default();
        let mut meter = HighpassEnergy::new(sample_rate, config.highpass_hz);
        let mut gov = GovernorState::new(config.clone());

        let mut screech = StereoBuffer::silence(2048);
        for (i, frame) in screech.iter_mut().enumerate() {
            let s = (std::f32::consts::TAU * 8000.0 * i as f32 / sample_rate as f32).sin() * 0.6;
            *frame = StereoSample::mono(s);
        }
        let silence = StereoBuffer::silence(2048);

        let mut ducked_at = None;
        for window in 0..config.trigger_windows + 2 {
            let energy = meter.measure(&screech);
            if gov.update(energy).is_some() {
                ducked_at = Some(window);
                break;
            }
        }
        assert_eq!(ducked_at, Some(config.trigger_windows - 1));

        let mut released = false;
        for _ in 0..config.release_windows + 2 {
            let energy = meter.measure(&silence);
            if gov.update(energy) == Some(1.0) {
                released = true;
                break;
            }
        }
        assert!(released);
    }
}
