//! Anomaly scoring of a single sample against its baseline
//!
//! Three checks run in a fixed priority order and the first match wins:
//!
//! 1. **Heart-rate spike**: z-score against the baseline. A flat baseline has no
//!    z-score, so a relative check (`hr > 1.5 × mean`) is used instead.
//! 2. **HRV drop**: fractional drop below the baseline mean.
//! 3. **Motion spike**: absolute rise above the baseline mean.
//!
//! Only the heart-rate branch has a zero-variance fallback. A zero HRV mean
//! disables the HRV check entirely.

use crate::baseline::BaselineStats;
use crate::config::DetectorConfig;
use crate::models::{BioSample, Detection, TriggerKind};

/// Ratio over a flat heart-rate baseline that counts as a spike
pub const FLAT_BASELINE_SPIKE_RATIO: f64 = 1.5;

/// Thresholds used by the three checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyDetector {
    hr_zscore_threshold: f64,
    hrv_drop_fraction: f64,
    motion_spike_threshold: f64,
}

impl AnomalyDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            hr_zscore_threshold: config.hr_zscore_threshold,
            hrv_drop_fraction: config.hrv_drop_fraction,
            motion_spike_threshold: config.motion_spike_threshold,
        }
    }

    /// Evaluate `sample` against `baseline`, returning the first triggered signal
    pub fn evaluate(&self, sample: &BioSample, baseline: &BaselineStats) -> Option<Detection> {
        self.check_heart_rate(sample, baseline)
            .or_else(|| self.check_hrv(sample, baseline))
            .or_else(|| self.check_motion(sample, baseline))
    }

    fn check_heart_rate(&self, sample: &BioSample, baseline: &BaselineStats) -> Option<Detection> {
        let hr = sample.heart_rate as f64;

        if baseline.hr_std_dev > 0.0 {
            let z = (hr - baseline.hr_mean) / baseline.hr_std_dev;
            if z >= self.hr_zscore_threshold {
                return Some(Detection {
                    trigger: TriggerKind::HeartRateSpike,
                    severity: clamp_unit(z / self.hr_zscore_threshold),
                });
            }
            return None;
        }

        if hr > baseline.hr_mean * FLAT_BASELINE_SPIKE_RATIO {
            // A zero mean yields an infinite ratio, which the clamp caps at 1
            return Some(Detection {
                trigger: TriggerKind::HeartRateSpike,
                severity: clamp_unit((hr - baseline.hr_mean) / baseline.hr_mean),
            });
        }
        None
    }

    fn check_hrv(&self, sample: &BioSample, baseline: &BaselineStats) -> Option<Detection> {
        if baseline.hrv_mean <= 0.0 {
            return None;
        }

        let drop = (baseline.hrv_mean - sample.heart_rate_variability) / baseline.hrv_mean;
        (drop >= self.hrv_drop_fraction).then(|| Detection {
            trigger: TriggerKind::HeartRateVarDrop,
            severity: clamp_unit(drop / self.hrv_drop_fraction),
        })
    }

    fn check_motion(&self, sample: &BioSample, baseline: &BaselineStats) -> Option<Detection> {
        let delta = sample.motion_magnitude - baseline.motion_mean;
        (delta >= self.motion_spike_threshold).then(|| Detection {
            trigger: TriggerKind::MotionSpike,
            severity: clamp_unit(delta / self.motion_spike_threshold),
        })
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SleepStage;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(&DetectorConfig::default())
    }

    fn baseline(hr_mean: f64, hr_std_dev: f64, hrv_mean: f64, motion_mean: f64) -> BaselineStats {
        BaselineStats {
            hr_mean,
            hr_std_dev,
            hrv_mean,
            motion_mean,
            sample_count: 10,
        }
    }

    fn sample(hr: i32, hrv: f64, motion: f64) -> BioSample {
        BioSample {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap(),
            heart_rate: hr,
            heart_rate_variability: hrv,
            motion_magnitude: motion,
            sleep_stage: SleepStage::NonRem,
        }
    }

    #[test]
    fn test_zscore_at_threshold_has_full_severity() {
        let result = detector()
            .evaluate(&sample(70, 50.0, 0.1), &baseline(60.0, 5.0, 50.0, 0.1))
            .unwrap();

        assert_eq!(result.trigger, TriggerKind::HeartRateSpike);
        assert_eq!(result.severity, 1.0);
    }

    #[test]
    fn test_zscore_above_threshold_is_clamped() {
        let result = detector()
            .evaluate(&sample(72, 50.0, 0.1), &baseline(60.0, 5.0, 50.0, 0.1))
            .unwrap();

        assert_eq!(result.trigger, TriggerKind::HeartRateSpike);
        assert_eq!(result.severity, 1.0);
    }

    #[test]
    fn test_zscore_below_threshold_does_not_trigger() {
        assert!(detector()
            .evaluate(&sample(69, 50.0, 0.1), &baseline(60.0, 5.0, 50.0, 0.1))
            .is_none());
    }

    #[test]
    fn test_flat_baseline_fallback() {
        let flat = baseline(60.0, 0.0, 50.0, 0.1);

        let result = detector().evaluate(&sample(91, 50.0, 0.1), &flat).unwrap();
        assert_eq!(result.trigger, TriggerKind::HeartRateSpike);
        assert!((result.severity - 31.0 / 60.0).abs() < 1e-9);

        // 1.5 × 60 = 90 is not strictly above the ratio
        assert!(detector().evaluate(&sample(90, 50.0, 0.1), &flat).is_none());
    }

    #[test]
    fn test_flat_baseline_large_spike_is_clamped() {
        let result = detector()
            .evaluate(&sample(130, 50.0, 0.1), &baseline(60.0, 0.0, 50.0, 0.1))
            .unwrap();
        assert_eq!(result.severity, 1.0);
    }

    #[test]
    fn test_hrv_drop() {
        // 40% drop with a 30% threshold
        let result = detector()
            .evaluate(&sample(60, 30.0, 0.1), &baseline(60.0, 5.0, 50.0, 0.1))
            .unwrap();
        assert_eq!(result.trigger, TriggerKind::HeartRateVarDrop);
        assert_eq!(result.severity, 1.0);

        // 20% drop stays quiet
        assert!(detector()
            .evaluate(&sample(60, 40.0, 0.1), &baseline(60.0, 5.0, 50.0, 0.1))
            .is_none());
    }

    #[test]
    fn test_zero_hrv_baseline_skips_hrv_check() {
        // No fallback exists for the HRV branch
        assert!(detector()
            .evaluate(&sample(60, 0.0, 0.1), &baseline(60.0, 5.0, 0.0, 0.1))
            .is_none());
    }

    #[test]
    fn test_motion_spike() {
        let result = detector()
            .evaluate(&sample(60, 50.0, 0.35), &baseline(60.0, 5.0, 50.0, 0.1))
            .unwrap();
        assert_eq!(result.trigger, TriggerKind::MotionSpike);
        assert!((result.severity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_motion_check_runs_on_zero_baseline() {
        let result = detector()
            .evaluate(&sample(60, 50.0, 0.6), &baseline(60.0, 5.0, 50.0, 0.0))
            .unwrap();
        assert_eq!(result.trigger, TriggerKind::MotionSpike);
        assert_eq!(result.severity, 1.0);
    }

    #[test]
    fn test_priority_order_heart_rate_first() {
        // All three signals fire; only the heart-rate spike is reported
        let result = detector()
            .evaluate(&sample(80, 10.0, 2.0), &baseline(60.0, 5.0, 50.0, 0.1))
            .unwrap();
        assert_eq!(result.trigger, TriggerKind::HeartRateSpike);

        let result = detector()
            .evaluate(&sample(60, 10.0, 2.0), &baseline(60.0, 5.0, 50.0, 0.1))
            .unwrap();
        assert_eq!(result.trigger, TriggerKind::HeartRateVarDrop);
    }

    proptest! {
        #[test]
        fn test_severity_always_in_unit_range(
            hr in 0i32..250,
            hrv in 0.0f64..200.0,
            motion in 0.0f64..10.0,
            hr_mean in 0.0f64..150.0,
            hr_std in 0.0f64..30.0,
            hrv_mean in 0.0f64..150.0,
            motion_mean in 0.0f64..2.0
        ) {
            let stats = baseline(hr_mean, hr_std, hrv_mean, motion_mean);
            if let Some(result) = detector().evaluate(&sample(hr, hrv, motion), &stats) {
                prop_assert!((0.0..=1.0).contains(&result.severity));
            }
        }
    }
}
