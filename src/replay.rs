//! CSV replay of recorded nights
//!
//! Expected columns: `timestamp` (RFC 3339), `heart_rate`, `hrv`, `motion`,
//! `stage`. The long field names used by [`BioSample`] are accepted too.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::SourceError;
use crate::models::{BioSample, SleepStage};
use crate::source::SampleStream;

#[derive(Debug, Deserialize)]
struct SampleRecord {
    timestamp: DateTime<Utc>,
    heart_rate: i32,
    #[serde(alias = "heart_rate_variability")]
    hrv: f64,
    #[serde(alias = "motion_magnitude")]
    motion: f64,
    #[serde(alias = "sleep_stage")]
    stage: String,
}

impl SampleRecord {
    fn into_sample(self, record: u64) -> Result<BioSample, SourceError> {
        let sleep_stage: SleepStage = self
            .stage
            .parse()
            .map_err(|reason| SourceError::Malformed { record, reason })?;

        Ok(BioSample {
            timestamp: self.timestamp,
            heart_rate: self.heart_rate,
            heart_rate_variability: self.hrv,
            motion_magnitude: self.motion,
            sleep_stage,
        })
    }
}

/// Stream samples from any CSV reader. Rows that fail to decode become
/// `SourceError::Malformed` items and the stream carries on.
pub fn from_reader<R>(reader: R) -> SampleStream
where
    R: Read + Send + 'static,
{
    let rows = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
        .into_deserialize::<SampleRecord>()
        .enumerate()
        .map(|(index, row)| {
            // Header is line 1
            let record = index as u64 + 2;
            row.map_err(|e| SourceError::Malformed {
                record,
                reason: e.to_string(),
            })
            .and_then(|row| row.into_sample(record))
        });

    stream::iter(rows).boxed()
}

/// Open a CSV recording as a sample stream
pub fn open_csv<P: AsRef<Path>>(path: P) -> Result<SampleStream> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open recording: {}", path.as_ref().display()))?;
    Ok(from_reader(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const RECORDING: &str = "\
timestamp,heart_rate,hrv,motion,stage
2024-03-01T01:00:00Z,58,52.5,0.02,non_rem
2024-03-01T01:00:05Z,61,49.0,0.03,rem
2024-03-01T01:00:10Z,not-a-number,49.0,0.03,non_rem
2024-03-01T01:00:15Z,60,50.0,0.01,deep
";

    #[tokio::test]
    async fn test_reads_rows_and_reports_bad_ones() {
        let items: Vec<_> = from_reader(Cursor::new(RECORDING)).collect().await;
        assert_eq!(items.len(), 4);

        let first = items[0].as_ref().unwrap();
        assert_eq!(first.heart_rate, 58);
        assert_eq!(first.sleep_stage, SleepStage::NonRem);
        assert_eq!(items[1].as_ref().unwrap().sleep_stage, SleepStage::Rem);

        assert!(matches!(
            items[2],
            Err(SourceError::Malformed { record: 4, .. })
        ));
        assert!(matches!(
            items[3],
            Err(SourceError::Malformed { record: 5, ref reason }) if reason.contains("deep")
        ));
    }

    #[tokio::test]
    async fn test_long_column_names() {
        let csv = "\
timestamp,heart_rate,heart_rate_variability,motion_magnitude,sleep_stage
2024-03-01T01:00:00Z,58,52.5,0.02,nrem
";
        let items: Vec<_> = from_reader(Cursor::new(csv)).collect().await;
        assert_eq!(items.len(), 1);
        assert!((items[0].as_ref().unwrap().heart_rate_variability - 52.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file() {
        assert!(open_csv("/nonexistent/night.csv").is_err());
    }
}
