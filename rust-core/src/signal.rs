//! Gravity separation for the impact detector.
//!
//! The filter keeps an exponentially smoothed estimate of gravity and reports
//! the magnitude of what is left once gravity is removed. A crash shows up as
//! a short, large spike in that residual regardless of how the phone sits in
//! a pocket or a cradle.
//!
//! Design note: O(1) per sample, no buffers, no allocation on the hot path.

use serde::{Deserialize, Serialize};

use crate::types::{GravityEstimate, Sample};

/// Parameters for the motion filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Smoothing factor for the gravity estimate, strictly inside (0, 1).
    /// Higher = slower to follow orientation changes.
    pub alpha: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { alpha: 0.8 }
    }
}

/// Streaming gravity/linear-acceleration separator.
///
/// Gravity starts at zero, so the first handful of samples under-estimate it
/// and report a large residual. That warm-up transient is left alone.
#[derive(Debug, Clone)]
pub struct MotionFilter {
    /// Current gravity estimate [x, y, z] in m/s².
    gravity: [f32; 3],

    /// Smoothing factor, fixed at construction.
    alpha: f32,

    /// Samples seen since the last reset.
    sample_count: u64,
}

impl MotionFilter {
    /// Create a filter from configuration.
    pub fn new(config: &FilterConfig) -> Self {
        Self::with_alpha(config.alpha)
    }

    /// Create a filter with an explicit smoothing factor.
    pub fn with_alpha(alpha: f32) -> Self {
        debug_assert!(alpha > 0.0 && alpha < 1.0, "alpha must be in (0, 1)");
        Self {
            gravity: [0.0; 3],
            alpha,
            sample_count: 0,
        }
    }

    /// Feed one sample and return the linear acceleration magnitude (m/s²).
    ///
    /// g = α·g + (1-α)·a, linear = a - g, result = |linear|.
    pub fn update(&mut self, sample: &Sample) -> f32 {
        let alpha = self.alpha;
        let mut sum_sq = 0.0;

        for (g, a) in self.gravity.iter_mut().zip(sample.accel.iter()) {
            *g = alpha * *g + (1.0 - alpha) * *a;
            let linear = *a - *g;
            sum_sq += linear * linear;
        }

        self.sample_count += 1;
        sum_sq.sqrt()
    }

    /// Current gravity estimate.
    pub fn gravity(&self) -> GravityEstimate {
        GravityEstimate::from(self.gravity)
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Number of samples processed since construction or the last reset.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Forget the gravity estimate. Used when a monitoring session restarts.
    pub fn reset(&mut self) {
        self.gravity = [0.0; 3];
        self.sample_count = 0;
    }
}

impl Default for MotionFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_default_alpha() {
        let filter = MotionFilter::default();
        assert_eq!(filter.alpha(), 0.8);
        assert_eq!(filter.gravity(), GravityEstimate::default());
    }

    #[test]
    fn test_first_sample_residual() {
        // g = 0.2 * a, so linear = 0.8 * a
        let mut filter = MotionFilter::default();
        let mag = filter.update(&Sample::from_xyz(0.0, 0.0, 10.0));
        assert_relative_eq!(mag, 8.0, epsilon = 1e-5);
        assert_relative_eq!(filter.gravity().gz, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_resting_device_settles() {
        let mut filter = MotionFilter::default();
        let resting = Sample::from_xyz(0.1, 0.2, 9.81);
        let mut mag = f32::MAX;
        for _ in 0..200 {
            mag = filter.update(&resting);
        }
        assert!(mag < 1e-3, "residual should vanish, got {}", mag);
        assert_relative_eq!(filter.gravity().gz, 9.81, epsilon = 1e-3);
        assert_eq!(filter.sample_count(), 200);
    }

    #[test]
    fn test_spike_after_settling() {
        let mut filter = MotionFilter::default();
        for _ in 0..100 {
            filter.update(&Sample::from_xyz(0.0, 0.0, 9.81));
        }
        // 37.5 m/s² jump on x: 0.8 of it remains after one smoothing step
        let mag = filter.update(&Sample::from_xyz(37.5, 0.0, 9.81));
        assert_relative_eq!(mag, 30.0, epsilon = 1e-2);
    }

    #[test]
    fn test_reset_clears_gravity() {
        let mut filter = MotionFilter::default();
        filter.update(&Sample::from_xyz(1.0, 1.0, 1.0));
        filter.reset();
        assert_eq!(filter.gravity(), GravityEstimate::default());
        assert_eq!(filter.sample_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_constant_input_converges_monotonically(
            x in -50.0f32..50.0,
            y in -50.0f32..50.0,
            z in -50.0f32..50.0,
            alpha in 0.05f32..0.95,
        ) {
            let mut filter = MotionFilter::with_alpha(alpha);
            let sample = Sample::from_xyz(x, y, z);
            let target = [x, y, z];
            let mut prev = [f32::MAX; 3];

            for _ in 0..64 {
                filter.update(&sample);
                let g = filter.gravity().as_array();
                for axis in 0..3 {
                    let dist = (target[axis] - g[axis]).abs();
                    prop_assert!(dist <= prev[axis] + 1e-4);
                    prev[axis] = dist;
                }
            }
        }
    }
}
