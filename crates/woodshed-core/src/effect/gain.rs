//! Exponentially smoothed gain stage.

use crate::types::StereoBuffer;

/// A gain whose applied value chases a target through a one-pole ramp.
///
/// Every consumer that changes level at runtime (the volume control and the
/// feedback governor) goes through one of these so level changes are
/// exponential ramps, never steps; a step at block boundaries is an
/// audible click.
#[derive(Debug, Clone)]
pub struct SmoothedGain {
    current: f32,
    target: f32,
    /// Per-sample smoothing coefficient; current moves toward target by
    /// (1 - coeff) of the remaining distance each sample.
    coeff: f32,
}

impl SmoothedGain {
    /// `ramp_ms` is the time constant of the exponential ramp.
    pub fn new(sample_rate: u32, ramp_ms: f32, initial: f32) -> Self {
        let tau_samples = (ramp_ms / 1000.0) * sample_rate as f32;
        let coeff = if tau_samples > 0.0 {
            (-1.0 / tau_samples).exp()
        } else {
            0.0
        };
        Self {
            current: initial,
            target: initial,
            coeff,
        }
    }

    #[inline]
    pub fn set_target(&mut self, target: f32) {
        self.target = target.max(0.0);
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// The gain applied to the most recent sample
    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Advance one sample and return the gain to apply
    #[inline]
    pub fn next(&mut self) -> f32 {
        self.current = self.target + (self.current - self.target) * self.coeff;
        self.current
    }

    /// Apply the ramping gain across a stereo block in place
    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        for frame in buffer.iter_mut() {
            *frame *= self.next();
        }
    }

    /// Jump straight to a value without ramping (session start)
    pub fn snap_to(&mut self, value: f32) {
        self.current = value.max(0.0);
        self.target = self.current;
    }
}
