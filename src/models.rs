use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sleep stage reported by the wearable alongside each sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    Wake,
    NonRem,
    Rem,
    Unknown,
}

impl std::str::FromStr for SleepStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wake" | "awake" => Ok(SleepStage::Wake),
            "non_rem" | "nonrem" | "nrem" => Ok(SleepStage::NonRem),
            "rem" => Ok(SleepStage::Rem),
            "unknown" => Ok(SleepStage::Unknown),
            _ => Err(format!("Invalid sleep stage: {}", s)),
        }
    }
}

/// One biometric reading from the sample source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioSample {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,

    /// Heart rate in beats per minute
    pub heart_rate: i32,

    /// Heart rate variability (RMSSD) in milliseconds
    pub heart_rate_variability: f64,

    /// Accelerometer magnitude, gravity removed
    pub motion_magnitude: f64,

    /// Sleep stage at the time of the sample
    pub sleep_stage: SleepStage,
}

impl BioSample {
    /// Only NonREM samples take part in detection
    pub fn is_monitored(&self) -> bool {
        self.sleep_stage == SleepStage::NonRem
    }
}

/// Signal that caused a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    HeartRateSpike,
    HeartRateVarDrop,
    MotionSpike,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::HeartRateSpike => "heart_rate_spike",
            TriggerKind::HeartRateVarDrop => "heart_rate_var_drop",
            TriggerKind::MotionSpike => "motion_spike",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::HeartRateSpike => write!(f, "Heart Rate Spike"),
            TriggerKind::HeartRateVarDrop => write!(f, "HRV Drop"),
            TriggerKind::MotionSpike => write!(f, "Motion Spike"),
        }
    }
}

/// Outcome of evaluating one sample against its baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub trigger: TriggerKind,

    /// Normalized intensity, always within [0, 1]
    pub severity: f64,
}

/// Events published to observers of the monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    DetectedDistress {
        at: DateTime<Utc>,
        trigger: TriggerKind,
        severity: f64,
    },
    CuePlayed {
        at: DateTime<Utc>,
    },
    Recovered {
        at: DateTime<Utc>,
        #[serde(with = "duration_millis", rename = "stabilized_for_ms")]
        stabilized_for: Duration,
    },
}

impl ProtocolEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            ProtocolEvent::DetectedDistress { at, .. }
            | ProtocolEvent::CuePlayed { at }
            | ProtocolEvent::Recovered { at, .. } => *at,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::DetectedDistress { .. } => "detected_distress",
            ProtocolEvent::CuePlayed { .. } => "cue_played",
            ProtocolEvent::Recovered { .. } => "recovered",
        }
    }
}

impl fmt::Display for ProtocolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolEvent::DetectedDistress {
                at,
                trigger,
                severity,
            } => write!(
                f,
                "{} distress detected ({}, severity {:.2})",
                at.format("%H:%M:%S"),
                trigger,
                severity
            ),
            ProtocolEvent::CuePlayed { at } => {
                write!(f, "{} calming cue played", at.format("%H:%M:%S"))
            }
            ProtocolEvent::Recovered { at, stabilized_for } => write!(
                f,
                "{} recovered (stable for {}s)",
                at.format("%H:%M:%S"),
                stabilized_for.num_seconds()
            ),
        }
    }
}

// Helper module for serde duration serialization
pub(crate) mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sleep_stage_parsing() {
        assert_eq!("nrem".parse::<SleepStage>().unwrap(), SleepStage::NonRem);
        assert_eq!("REM".parse::<SleepStage>().unwrap(), SleepStage::Rem);
        assert_eq!("awake".parse::<SleepStage>().unwrap(), SleepStage::Wake);
        assert!("deep".parse::<SleepStage>().is_err());
    }

    #[test]
    fn test_only_nonrem_is_monitored() {
        let mut sample = BioSample {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap(),
            heart_rate: 60,
            heart_rate_variability: 50.0,
            motion_magnitude: 0.0,
            sleep_stage: SleepStage::NonRem,
        };
        assert!(sample.is_monitored());

        sample.sleep_stage = SleepStage::Rem;
        assert!(!sample.is_monitored());
    }

    #[test]
    fn test_recovered_event_json_shape() {
        let event = ProtocolEvent::Recovered {
            at: Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap(),
            stabilized_for: Duration::seconds(90),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "recovered");
        assert_eq!(json["stabilized_for_ms"], 90_000);
        assert_eq!(event.name(), "recovered");
    }
}
