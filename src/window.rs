//! Time-bounded sliding window of recent NonREM samples

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use crate::models::BioSample;

/// Samples retained within `duration` of the latest timestamp seen.
///
/// Entries keep arrival order. The window is bounded by age, not by count.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: VecDeque<BioSample>,
    duration: Duration,
    latest: Option<DateTime<Utc>>,
}

impl SlidingWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            duration,
            latest: None,
        }
    }

    /// Append a sample and prune everything older than `latest - duration`.
    ///
    /// A sample that is already outside the window is appended and then
    /// pruned straight away.
    pub fn push(&mut self, sample: BioSample) -> &VecDeque<BioSample> {
        let latest = match self.latest {
            Some(current) if current >= sample.timestamp => current,
            _ => sample.timestamp,
        };
        self.latest = Some(latest);
        self.samples.push_back(sample);

        let cutoff = self.cutoff_from(latest);
        while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            self.samples.pop_front();
        }
        // Out-of-order stragglers can sit behind in-window entries
        if self.samples.iter().any(|s| s.timestamp < cutoff) {
            self.samples.retain(|s| s.timestamp >= cutoff);
        }

        &self.samples
    }

    /// Oldest timestamp still accepted by the window
    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.latest.map(|latest| self.cutoff_from(latest))
    }

    // Saturates at the earliest representable instant for very long windows
    fn cutoff_from(&self, latest: DateTime<Utc>) -> DateTime<Utc> {
        latest
            .checked_sub_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Most recently appended sample
    pub fn newest(&self) -> Option<&BioSample> {
        self.samples.back()
    }

    /// Every sample except the newest one
    pub fn baseline_set(&self) -> impl Iterator<Item = &BioSample> + '_ {
        let n = self.samples.len().saturating_sub(1);
        self.samples.iter().take(n)
    }

    pub fn samples(&self) -> &VecDeque<BioSample> {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.latest = None;
    }
}
