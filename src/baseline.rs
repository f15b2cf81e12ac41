//! Baseline statistics over the trailing window
//!
//! The baseline set is the window minus its newest sample, so the sample under
//! test never influences the statistics it is compared against.

use serde::{Deserialize, Serialize};

use crate::models::BioSample;

/// Summary of the baseline set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    /// Mean heart rate (bpm)
    pub hr_mean: f64,

    /// Population standard deviation of heart rate. Zero for a flat baseline.
    pub hr_std_dev: f64,

    /// Mean heart rate variability (ms)
    pub hrv_mean: f64,

    /// Mean motion magnitude
    pub motion_mean: f64,

    /// Number of samples the statistics were computed from
    pub sample_count: usize,
}

impl BaselineStats {
    /// Compute statistics, or `None` when fewer than `min_samples` are available.
    ///
    /// Too little data is not an error: the caller skips detection for that sample.
    pub fn compute<'a, I>(baseline: I, min_samples: usize) -> Option<Self>
    where
        I: IntoIterator<Item = &'a BioSample>,
    {
        let samples: Vec<&BioSample> = baseline.into_iter().collect();
        let n = samples.len();
        if n == 0 || n < min_samples {
            return None;
        }
        let count = n as f64;

        let hr_mean = samples.iter().map(|s| s.heart_rate as f64).sum::<f64>() / count;
        let hr_variance = samples
            .iter()
            .map(|s| (s.heart_rate as f64 - hr_mean).powi(2))
            .sum::<f64>()
            / count;
        let hrv_mean = samples.iter().map(|s| s.heart_rate_variability).sum::<f64>() / count;
        let motion_mean = samples.iter().map(|s| s.motion_magnitude).sum::<f64>() / count;

        Some(Self {
            hr_mean,
            hr_std_dev: hr_variance.sqrt(),
            hrv_mean,
            motion_mean,
            sample_count: n,
        })
    }

    /// True when every baseline heart rate was identical
    pub fn is_flat(&self) -> bool {
        self.hr_std_dev == 0.0
    }
}
