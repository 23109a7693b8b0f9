//! Analysis window generation for the overlap-add stages.

use crate::types::Sample;

/// Generate a symmetric Hann window of exactly `size` samples.
///
/// `w[i] = 0.5 - 0.5 * cos(2π·i / (size - 1))`, endpoints zero for sizes
/// above one. Each processing stage generates its window once at
/// construction and reuses it across frames.
pub fn hann_window(size: usize) -> Vec<Sample> {
    assert!(size > 0, "window size must be positive");
    // max(size-1, 1) keeps size == 1 from dividing by zero
    let denom = (size - 1).max(1) as f32;
    (0..size)
        .map(|i| 0.5 - 0.5 * (std::f32::consts::TAU * i as f32 / denom).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_zero() {
        let w = hann_window(1024);
        assert!(w[0].abs() < 1e-7);
        assert!(w[1023].abs() < 1e-7);
    }

    #[test]
    fn symmetric_and_bounded() {
        let n = 513;
        let w = hann_window(n);
        for i in 0..n {
            assert!((0.0..=1.0).contains(&w[i]), "w[{}] = {} out of range", i, w[i]);
            assert!(
                (w[i] - w[n - 1 - i]).abs() < 1e-6,
                "asymmetry at {}: {} vs {}",
                i,
                w[i],
                w[n - 1 - i]
            );
        }
        // Odd length peaks at exactly 1.0 in the middle
        assert!((w[n / 2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn single_sample_window() {
        // Degenerate size must not divide by zero
        let w = hann_window(1);
        assert_eq!(w.len(), 1);
        assert!(w[0].is_finite());
    }

    #[test]
    fn half_overlap_sums_to_unity() {
        // 50% overlapped Hann windows are constant-overlap-add; the grain
        // scheduler in the pitch shifter relies on this.
        let n = 256;
        let w = hann_window(n);
        for i in 0..n / 2 {
            let sum = w[i] + w[i + n / 2];
            assert!((sum - 1.0).abs() < 0.02, "sum at {} = {}", i, sum);
        }
    }
}
