//! Impact Detection Module.
//!
//! Wraps the motion filter and turns its linear acceleration magnitude into a
//! discrete impact signal. The detector fires at most once per arming: after
//! an impact it goes `Suppressed` and stays there until the controller
//! explicitly re-arms it.
//!
//! Suppression is enforced by the controller not delivering samples while an
//! alert sequence is active; the detector itself only refuses to fire unless
//! it is `Armed`.

use serde::{Deserialize, Serialize};

use crate::signal::{FilterConfig, MotionFilter};
use crate::types::{DetectorState, GravityEstimate, ImpactEvent, Sample};

/// Configuration for impact detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Linear acceleration (m/s²) that must be strictly exceeded to fire.
    pub threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 25.0, // tuned crash threshold
        }
    }
}

/// Single-threshold impact detector.
pub struct ImpactDetector {
    filter: MotionFilter,
    threshold: f32,
    state: DetectorState,

    // Statistics
    impacts_detected: u64,
    rejected_samples: u64,
    peak_magnitude: f32,
}

impl ImpactDetector {
    /// Create a new detector. Starts `Idle`.
    pub fn new(filter_config: &FilterConfig, config: &DetectorConfig) -> Self {
        Self {
            filter: MotionFilter::new(filter_config),
            threshold: config.threshold,
            state: DetectorState::Idle,
            impacts_detected: 0,
            rejected_samples: 0,
            peak_magnitude: 0.0,
        }
    }

    /// Create with default configuration.
    pub fn default_detector() -> Self {
        Self::new(&FilterConfig::default(), &DetectorConfig::default())
    }

    /// Process a sample. Returns an event when an armed detector sees a
    /// magnitude strictly above the threshold.
    ///
    /// Non-finite readings are dropped before they reach the filter; a single
    /// NaN would otherwise poison the gravity estimate for good.
    pub fn on_sample(&mut self, sample: &Sample) -> Option<ImpactEvent> {
        if !sample.accel.iter().all(|v| v.is_finite()) {
            self.rejected_samples += 1;
            tracing::warn!(timestamp_ms = sample.timestamp_ms, "Dropping non-finite sample");
            return None;
        }

        let magnitude = self.filter.update(sample);
        if magnitude > self.peak_magnitude {
            self.peak_magnitude = magnitude;
        }

        if self.state != DetectorState::Armed || magnitude <= self.threshold {
            return None;
        }

        self.state = DetectorState::Suppressed;
        self.impacts_detected += 1;
        tracing::info!(
            magnitude,
            threshold = self.threshold,
            timestamp_ms = sample.timestamp_ms,
            "Crash-like acceleration detected"
        );

        Some(ImpactEvent {
            magnitude,
            timestamp_ms: sample.timestamp_ms,
        })
    }

    /// Start (or resume) watching for impacts. The gravity estimate is kept.
    pub fn arm(&mut self) {
        if self.state != DetectorState::Armed {
            tracing::debug!(from = ?self.state, "Detector armed");
        }
        self.state = DetectorState::Armed;
    }

    /// Stop watching for impacts.
    pub fn disarm(&mut self) {
        self.state = DetectorState::Idle;
    }

    /// Drop the gravity estimate, e.g. when monitoring is switched back on.
    pub fn reset_filter(&mut self) {
        self.filter.reset();
        self.peak_magnitude = 0.0;
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == DetectorState::Armed
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Current gravity estimate of the underlying filter.
    pub fn gravity(&self) -> GravityEstimate {
        self.filter.gravity()
    }

    /// Impacts fired since construction.
    pub fn impacts_detected(&self) -> u64 {
        self.impacts_detected
    }

    /// Non-finite samples dropped since construction.
    pub fn rejected_samples(&self) -> u64 {
        self.rejected_samples
    }

    /// Largest magnitude observed since the last filter reset.
    pub fn peak_magnitude(&self) -> f32 {
        self.peak_magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Settle the filter on a resting device so the next sample's residual
    /// is 0.8 of its deviation from rest.
    fn settled_detector(threshold: f32) -> ImpactDetector {
        let mut detector = ImpactDetector::new(
            &FilterConfig::default(),
            &DetectorConfig { threshold },
        );
        detector.arm();
        for _ in 0..100 {
            assert!(detector.on_sample(&Sample::from_xyz(0.0, 0.0, 0.0)).is_none());
        }
        detector
    }

    #[test]
    fn test_detector_creation() {
        let detector = ImpactDetector::default_detector();
        assert_eq!(detector.state(), DetectorState::Idle);
        assert_eq!(detector.threshold(), 25.0);
    }

    #[test]
    fn test_idle_detector_never_fires() {
        let mut detector = ImpactDetector::default_detector();
        assert!(detector.on_sample(&Sample::from_xyz(500.0, 0.0, 0.0)).is_none());
        assert_eq!(detector.state(), DetectorState::Idle);
    }

    #[test]
    fn test_spike_fires_and_suppresses() {
        let mut detector = settled_detector(25.0);
        // residual = 0.8 * 37.5 = 30
        let event = detector.on_sample(&Sample::new(1234, [37.5, 0.0, 0.0]));
        let event = event.expect("spike above threshold must fire");
        assert!((event.magnitude - 30.0).abs() < 1e-3);
        assert_eq!(event.timestamp_ms, 1234);
        assert_eq!(detector.state(), DetectorState::Suppressed);
        assert_eq!(detector.impacts_detected(), 1);

        // Suppressed: no second event even for a bigger spike
        assert!(detector.on_sample(&Sample::from_xyz(200.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_exactly_threshold_does_not_fire() {
        // residual = 0.8 * 31.25 = 25.0 exactly
        let mut detector = settled_detector(25.0);
        assert!(detector.on_sample(&Sample::from_xyz(31.25, 0.0, 0.0)).is_none());
        assert!(detector.is_armed());
    }

    #[test]
    fn test_rearm_preserves_gravity() {
        let mut detector = ImpactDetector::default_detector();
        detector.arm();
        for _ in 0..50 {
            detector.on_sample(&Sample::from_xyz(0.0, 0.0, 9.81));
        }
        detector.disarm();
        let before = detector.gravity();
        detector.arm();
        assert_eq!(detector.gravity(), before);
        assert_eq!(detector.state(), DetectorState::Armed);
    }

    #[test]
    fn test_disarm_from_suppressed() {
        let mut detector = settled_detector(25.0);
        detector.on_sample(&Sample::from_xyz(100.0, 0.0, 0.0));
        assert_eq!(detector.state(), DetectorState::Suppressed);
        detector.disarm();
        assert_eq!(detector.state(), DetectorState::Idle);
    }

    #[test]
    fn test_reset_filter() {
        let mut detector = settled_detector(25.0);
        detector.on_sample(&Sample::from_xyz(3.0, 3.0, 3.0));
        detector.reset_filter();
        assert_eq!(detector.gravity(), GravityEstimate::default());
        assert_eq!(detector.peak_magnitude(), 0.0);
    }

    #[test]
    fn test_non_finite_sample_dropped() {
        let mut detector = settled_detector(25.0);
        let before = detector.gravity();

        assert!(detector.on_sample(&Sample::from_xyz(f32::NAN, 0.0, 0.0)).is_none());
        assert!(detector.on_sample(&Sample::from_xyz(0.0, f32::INFINITY, 0.0)).is_none());
        assert_eq!(detector.rejected_samples(), 2);
        assert_eq!(detector.gravity(), before);

        // still able to fire afterwards
        assert!(detector.on_sample(&Sample::from_xyz(40.0, 0.0, 0.0)).is_some());
    }

    proptest! {
        #[test]
        fn prop_isolated_spike_fires_iff_above_threshold(deviation in 0.0f32..80.0) {
            let mut detector = settled_detector(25.0);
            let magnitude_expected = 0.8 * deviation;
            let event = detector.on_sample(&Sample::from_xyz(deviation, 0.0, 0.0));
            // stay clear of float rounding right at the boundary
            prop_assume!((magnitude_expected - 25.0).abs() > 1e-3);
            prop_assert_eq!(event.is_some(), magnitude_expected > 25.0);
        }
    }
}
