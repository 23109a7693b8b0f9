//! Output safety clipper.
//!
//! Sits at the end of the chain so that pitch shifting, overlap-add and
//! gain changes can never hand the device samples beyond full scale.
//! Below the threshold it is a pure bypass; above it, the excess is folded
//! through a tanh knee whose ceiling is exactly 1.0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::{Sample, StereoBuffer};

/// A soft safety clipper with a clip-activity indicator.
pub struct SafetyClipper {
    /// Linear threshold where the knee starts
    threshold: f32,
    /// Pre-computed 1.0 - threshold (knee span)
    span: f32,
    /// Set when any sample in a block crossed the threshold.
    /// Audio thread sets it; the control thread reads and clears it.
    clip_active: Arc<AtomicBool>,
}

impl SafetyClipper {
    /// Default threshold of -0.3 dBFS
    pub fn new() -> Self {
        Self::with_threshold_db(-0.3)
    }

    pub fn with_threshold_db(db: f32) -> Self {
        let threshold = 10.0_f32.powf(db / 20.0).min(0.999);
        Self {
            threshold,
            span: 1.0 - threshold,
            clip_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shareable indicator for metering
    pub fn clip_indicator(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.clip_active)
    }

    #[inline]
    fn clip_sample(&self, input: Sample, clipped: &mut bool) -> Sample {
        let magnitude = input.abs();
        if magnitude <= self.threshold {
            return input;
        }
        *clipped = true;
        let folded = self.threshold + self.span * ((magnitude - self.threshold) / self.span).tanh();
        folded.copysign(input)
    }

    /// Process a stereo block in place
    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        let mut clipped = false;
        for frame in buffer.iter_mut() {
            frame.left = self.clip_sample(frame.left, &mut clipped);
            frame.right = self.clip_sample(frame.right, &mut clipped);
        }
        if clipped {
            self.clip_active.store(true, Ordering::Relaxed);
        }
    }
}

impl Default for SafetyClipper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    fn buffer_of(level: f32, len: usize) -> StereoBuffer {
        let mut buf = StereoBuffer::silence(len);
        for frame in buf.iter_mut() {
            *frame = StereoSample::mono(level);
        }
        buf
    }

    #[test]
    fn below_threshold_is_bypass() {
        let mut clipper = SafetyClipper::new();
        let mut buf = buffer_of(0.5, 32);
        clipper.process(&mut buf);
        for frame in buf.iter() {
            assert_eq!(frame.left, 0.5);
        }
        assert!(!clipper.clip_indicator().load(Ordering::Relaxed));
    }

    #[test]
    fn hot_signal_stays_under_full_scale() {
        let mut clipper = SafetyClipper::new();
        let mut buf = buffer_of(2.5, 32);
        clipper.process(&mut buf);
        for frame in buf.iter() {
            assert!(frame.left < 1.0, "left = {}", frame.left);
            assert!(frame.left > clipper.threshold);
        }
        assert!(clipper.clip_indicator().load(Ordering::Relaxed));
    }

    #[test]
    fn negative_signal_is_symmetric() {
        let mut clipper = SafetyClipper::new();
        let mut pos = buffer_of(1.8, 8);
        let mut neg = buffer_of(-1.8, 8);
        clipper.process(&mut pos);
        clipper.process(&mut neg);
        for (p, n) in pos.iter().zip(neg.iter()) {
            assert!((p.left + n.left).abs() < 1e-6);
        }
    }

    #[test]
    fn knee_is_continuous_at_threshold() {
        let clipper = SafetyClipper::new();
        let mut clipped = false;
        let just_below = clipper.threshold - 1e-4;
        let just_above = clipper.threshold + 1e-4;
        let a = clipper.clip_sample(just_below, &mut clipped);
        let b = clipper.clip_sample(just_above, &mut clipped);
        assert!((a - b).abs() < 1e-3);
    }
}
