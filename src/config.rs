use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Longest accepted window, cooldown or recovery span (one week)
pub const MAX_DURATION_SECS: i64 = 7 * 24 * 60 * 60;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Distress detection thresholds and timing
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Logging output settings
    #[serde(default)]
    pub logging: LogConfig,

    /// Protocol event fan-out settings
    #[serde(default)]
    pub events: EventSettings,
}

/// Detection thresholds and timing windows.
///
/// Durations are stored in whole seconds so the TOML stays readable; use the
/// accessor methods to get `chrono::Duration` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Heart-rate z-score at or above which a spike is reported
    pub hr_zscore_threshold: f64,

    /// Fractional HRV drop (0.3 = 30% below baseline) that counts as distress
    pub hrv_drop_fraction: f64,

    /// Motion magnitude above the baseline mean that counts as a spike
    pub motion_spike_threshold: f64,

    /// Length of the trailing baseline window
    pub window_secs: i64,

    /// Minimum time between two interventions
    pub cooldown_secs: i64,

    /// Uninterrupted calm time required before declaring recovery
    pub recovery_secs: i64,

    /// Baseline samples required before statistics are trusted
    pub min_baseline_samples: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            hr_zscore_threshold: 2.0,
            hrv_drop_fraction: 0.3,
            motion_spike_threshold: 0.5,
            window_secs: 300,
            cooldown_secs: 600,
            recovery_secs: 120,
            min_baseline_samples: 10,
        }
    }
}

impl DetectorConfig {
    /// Accessors clamp to `0..=MAX_DURATION_SECS`, so an unvalidated config
    /// still yields a representable duration.
    pub fn window_duration(&self) -> Duration {
        bounded_seconds(self.window_secs)
    }

    pub fn cooldown_duration(&self) -> Duration {
        bounded_seconds(self.cooldown_secs)
    }

    pub fn recovery_window(&self) -> Duration {
        bounded_seconds(self.recovery_secs)
    }

    /// Check every field is in range
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
            ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                reason: reason.to_string(),
            }
        }

        if !(self.hr_zscore_threshold.is_finite() && self.hr_zscore_threshold > 0.0) {
            return Err(invalid(
                "hr_zscore_threshold",
                self.hr_zscore_threshold,
                "must be a positive number",
            ));
        }
        if !(self.hrv_drop_fraction > 0.0 && self.hrv_drop_fraction <= 1.0) {
            return Err(invalid(
                "hrv_drop_fraction",
                self.hrv_drop_fraction,
                "must be within (0, 1]",
            ));
        }
        if !(self.motion_spike_threshold.is_finite() && self.motion_spike_threshold > 0.0) {
            return Err(invalid(
                "motion_spike_threshold",
                self.motion_spike_threshold,
                "must be a positive number",
            ));
        }
        if !(1..=MAX_DURATION_SECS).contains(&self.window_secs) {
            return Err(invalid(
                "window_secs",
                self.window_secs,
                "must be between 1 second and one week",
            ));
        }
        if !(0..=MAX_DURATION_SECS).contains(&self.cooldown_secs) {
            return Err(invalid(
                "cooldown_secs",
                self.cooldown_secs,
                "must be between 0 and one week",
            ));
        }
        if !(1..=MAX_DURATION_SECS).contains(&self.recovery_secs) {
            return Err(invalid(
                "recovery_secs",
                self.recovery_secs,
                "must be between 1 second and one week",
            ));
        }
        if self.min_baseline_samples == 0 {
            return Err(invalid(
                "min_baseline_samples",
                self.min_baseline_samples,
                "at least one baseline sample is required",
            ));
        }
        Ok(())
    }
}

fn bounded_seconds(secs: i64) -> Duration {
    Duration::seconds(secs.clamp(0, MAX_DURATION_SECS))
}

/// Broadcast channel settings for protocol events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Events buffered per slow subscriber before it starts lagging
    pub channel_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            reason: e.to_string(),
        })?;

        config.detector.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sleepguard")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(
                    path = %config_path.display(),
                    error = %e,
                    "Config file not usable, using defaults"
                );
                Self::default()
            }
        }
    }
}
