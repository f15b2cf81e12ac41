//! Intervention state machine
//!
//! Drives the Monitoring → Distress → Recovering → Monitoring cycle, one NonREM
//! sample at a time:
//!
//! - **Monitoring**: an anomaly starts a distress episode, unless the cooldown
//!   since the previous intervention is still running.
//! - **Distress**: the first calm sample starts recovery tracking.
//! - **Recovering**: any anomaly cancels recovery progress. Once the calm span
//!   reaches the recovery window the episode ends.
//!
//! Each call to [`StateMachine::process`] is one atomic step: window update,
//! baseline, detection and transition. Audio playback is not performed here;
//! the returned [`Step`] tells the caller when a cue must be requested.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::baseline::BaselineStats;
use crate::config::DetectorConfig;
use crate::detector::AnomalyDetector;
use crate::diagnostics::{event_types, DiagnosticRecord, SessionSink};
use crate::events::EventEmitter;
use crate::models::{BioSample, Detection, ProtocolEvent};
use crate::window::SlidingWindow;

/// Current phase of the intervention cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Monitoring,
    Distress {
        since: DateTime<Utc>,
    },
    Recovering {
        since: DateTime<Utc>,
        recovery_start: DateTime<Utc>,
    },
}

impl Phase {
    pub fn in_distress(&self) -> bool {
        !matches!(self, Phase::Monitoring)
    }

    pub fn recovery_start(&self) -> Option<DateTime<Utc>> {
        match self {
            Phase::Recovering { recovery_start, .. } => Some(*recovery_start),
            _ => None,
        }
    }
}

/// What processing one sample did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Not a NonREM sample
    Ignored,
    /// Already outside the window when it arrived
    Stale,
    /// Not enough baseline samples yet
    Warmup,
    /// No anomaly while monitoring
    Calm,
    /// Distress episode started; a cue must be requested
    DistressDetected {
        at: DateTime<Utc>,
        detection: Detection,
    },
    /// Anomaly while monitoring, but the cooldown is still running
    Suppressed { remaining: Duration },
    /// Anomaly while already in distress
    StillDistressed,
    /// First calm sample of a distress episode
    RecoveryStarted,
    /// Calm, but the recovery window has not elapsed yet
    Recovering { stable_for: Duration },
    /// Anomaly interrupted recovery progress
    RecoveryReset,
    /// Recovery window reached; back to monitoring
    Recovered { stabilized_for: Duration },
}

/// Distress detection state owned by one monitoring session
#[derive(Debug)]
pub struct StateMachine {
    config: DetectorConfig,
    window: SlidingWindow,
    detector: AnomalyDetector,
    phase: Phase,
    last_cue_time: Option<DateTime<Utc>>,
    events: EventEmitter,
    diagnostics: SessionSink,
}

impl StateMachine {
    pub fn new(config: DetectorConfig, events: EventEmitter, diagnostics: SessionSink) -> Self {
        Self {
            window: SlidingWindow::new(config.window_duration()),
            detector: AnomalyDetector::new(&config),
            config,
            phase: Phase::Monitoring,
            last_cue_time: None,
            events,
            diagnostics,
        }
    }

    /// Process one sample from the source
    pub fn process(&mut self, sample: BioSample) -> Step {
        if !sample.is_monitored() {
            debug!(stage = ?sample.sleep_stage, at = %sample.timestamp, "sample ignored");
            return Step::Ignored;
        }

        let now = sample.timestamp;
        self.window.push(sample);
        if self.window.cutoff().is_some_and(|cutoff| now < cutoff) {
            debug!(at = %now, "stale sample pruned");
            return Step::Stale;
        }

        let Some(newest) = self.window.newest() else {
            return Step::Stale;
        };
        let Some(baseline) =
            BaselineStats::compute(self.window.baseline_set(), self.config.min_baseline_samples)
        else {
            debug!(buffered = self.window.len(), "baseline warming up");
            return Step::Warmup;
        };

        let detection = self.detector.evaluate(newest, &baseline);
        match (self.phase, detection) {
            (Phase::Monitoring, Some(detection)) => self.on_anomaly_while_monitoring(now, detection),
            (Phase::Monitoring, None) => Step::Calm,
            (Phase::Distress { .. }, Some(_)) => Step::StillDistressed,
            (Phase::Recovering { since, recovery_start }, Some(detection)) => {
                self.phase = Phase::Distress { since };
                debug!(at = %now, trigger = %detection.trigger, "recovery interrupted");
                self.diagnostics.emit(
                    DiagnosticRecord::new(now, event_types::RECOVERY_RESET)
                        .with("trigger", detection.trigger.as_str())
                        .with("severity", detection.severity)
                        .with("progress_ms", (now - recovery_start).num_milliseconds()),
                );
                Step::RecoveryReset
            }
            (Phase::Distress { since }, None) => {
                self.phase = Phase::Recovering {
                    since,
                    recovery_start: now,
                };
                self.diagnostics
                    .emit(DiagnosticRecord::new(now, event_types::RECOVERY_STARTED));
                self.check_recovery(now, now).unwrap_or(Step::RecoveryStarted)
            }
            (Phase::Recovering { recovery_start, .. }, None) => {
                let stable_for = now - recovery_start;
                self.check_recovery(now, recovery_start)
                    .unwrap_or(Step::Recovering { stable_for })
            }
        }
    }

    fn on_anomaly_while_monitoring(&mut self, now: DateTime<Utc>, detection: Detection) -> Step {
        if let Some(remaining) = self.cooldown_remaining(now) {
            debug!(at = %now, trigger = %detection.trigger, "detection suppressed by cooldown");
            self.diagnostics.emit(
                DiagnosticRecord::new(now, event_types::DETECTION_SUPPRESSED)
                    .with("trigger", detection.trigger.as_str())
                    .with("severity", detection.severity)
                    .with("cooldown_remaining_ms", remaining.num_milliseconds()),
            );
            return Step::Suppressed { remaining };
        }

        info!(
            at = %now,
            trigger = %detection.trigger,
            severity = detection.severity,
            "distress detected"
        );
        self.phase = Phase::Distress { since: now };
        self.last_cue_time = Some(now);

        self.events.emit(ProtocolEvent::DetectedDistress {
            at: now,
            trigger: detection.trigger,
            severity: detection.severity,
        });
        self.diagnostics.emit(
            DiagnosticRecord::new(now, event_types::DISTRESS_DETECTED)
                .with("trigger", detection.trigger.as_str())
                .with("severity", detection.severity),
        );

        Step::DistressDetected { at: now, detection }
    }

    fn check_recovery(&mut self, now: DateTime<Utc>, recovery_start: DateTime<Utc>) -> Option<Step> {
        let stabilized_for = now - recovery_start;
        if stabilized_for < self.config.recovery_window() {
            return None;
        }

        info!(at = %now, stable_secs = stabilized_for.num_seconds(), "recovered");
        self.phase = Phase::Monitoring;
        self.events.emit(ProtocolEvent::Recovered {
            at: now,
            stabilized_for,
        });
        self.diagnostics.emit(
            DiagnosticRecord::new(now, event_types::RECOVERED)
                .with("stabilized_for_ms", stabilized_for.num_milliseconds()),
        );
        Some(Step::Recovered { stabilized_for })
    }

    /// Time left before another intervention is allowed, if any
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_cue_time?;
        let elapsed = now - last;
        let cooldown = self.config.cooldown_duration();
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    /// Drop all buffered samples and transient state
    pub fn reset(&mut self) {
        self.window.clear();
        self.phase = Phase::Monitoring;
        self.last_cue_time = None;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn in_distress(&self) -> bool {
        self.phase.in_distress()
    }

    pub fn last_cue_time(&self) -> Option<DateTime<Utc>> {
        self.last_cue_time
    }

    pub fn recovery_start_time(&self) -> Option<DateTime<Utc>> {
        self.phase.recovery_start()
    }

    pub fn buffered_samples(&self) -> usize {
        self.window.len()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::models::{SleepStage, TriggerKind};
    use chrono::TimeZone;
    use std::sync::Arc;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    struct Harness {
        machine: StateMachine,
        events: broadcast::Receiver<ProtocolEvent>,
        sink: MemorySink,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap()
    }

    fn harness(config: DetectorConfig) -> Harness {
        let emitter = EventEmitter::new(64);
        let events = emitter.subscribe();
        let sink = MemorySink::new();
        let machine = StateMachine::new(
            config,
            emitter,
            SessionSink::new(Arc::new(sink.clone()), Uuid::new_v4()),
        );
        Harness {
            machine,
            events,
            sink,
        }
    }

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            window_secs: 600,
            cooldown_secs: 60,
            recovery_secs: 30,
            min_baseline_samples: 10,
            ..DetectorConfig::default()
        }
    }

    fn sample(secs: i64, hr: i32) -> BioSample {
        BioSample {
            timestamp: start() + Duration::seconds(secs),
            heart_rate: hr,
            heart_rate_variability: 50.0,
            motion_magnitude: 0.1,
            sleep_stage: SleepStage::NonRem,
        }
    }

    /// Ten samples alternating 55/65 bpm: mean 60, std dev 5
    fn warm_up(machine: &mut StateMachine) -> i64 {
        for i in 0..10 {
            let hr = if i % 2 == 0 { 55 } else { 65 };
            machine.process(sample(i, hr));
        }
        10
    }

    fn drain(events: &mut broadcast::Receiver<ProtocolEvent>) -> Vec<ProtocolEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[test]
    fn test_warmup_skips_detection() {
        let mut h = harness(test_config());
        for i in 0..10 {
            assert_eq!(h.machine.process(sample(i, 60)), Step::Warmup);
        }
        // Tenth baseline sample is now available
        assert_eq!(h.machine.process(sample(10, 60)), Step::Calm);
    }

    #[test]
    fn test_unvalidated_huge_durations_do_not_panic() {
        let mut h = harness(DetectorConfig {
            window_secs: 10_000_000_000_000,
            cooldown_secs: i64::MAX,
            ..test_config()
        });
        let t = warm_up(&mut h.machine);

        assert!(matches!(
            h.machine.process(sample(t, 80)),
            Step::DistressDetected { .. }
        ));
        assert!(h.machine.cooldown_remaining(sample(t + 1, 60).timestamp).is_some());
        assert_eq!(h.machine.buffered_samples(), 11);
    }

    #[test]
    fn test_spike_starts_distress() {
        let mut h = harness(test_config());
        let t = warm_up(&mut h.machine);

        let step = h.machine.process(sample(t, 72));
        match step {
            Step::DistressDetected { detection, .. } => {
                assert_eq!(detection.trigger, TriggerKind::HeartRateSpike);
                assert_eq!(detection.severity, 1.0);
            }
            other => panic!("unexpected step {:?}", other),
        }

        assert!(h.machine.in_distress());
        assert_eq!(h.machine.last_cue_time(), Some(sample(t, 72).timestamp));
        assert_eq!(h.sink.count_of(event_types::DISTRESS_DETECTED), 1);

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ProtocolEvent::DetectedDistress {
                trigger: TriggerKind::HeartRateSpike,
                ..
            }
        ));
    }

    #[test]
    fn test_non_nonrem_samples_change_nothing() {
        let mut h = harness(test_config());
        let t = warm_up(&mut h.machine);
        let before = h.machine.buffered_samples();

        for stage in [SleepStage::Wake, SleepStage::Rem, SleepStage::Unknown] {
            let mut spike = sample(t, 120);
            spike.sleep_stage = stage;
            assert_eq!(h.machine.process(spike), Step::Ignored);
        }

        assert_eq!(h.machine.buffered_samples(), before);
        assert_eq!(h.machine.phase(), Phase::Monitoring);
        assert!(drain(&mut h.events).is_empty());
    }

    #[test]
    fn test_recovery_after_stable_window() {
        let mut h = harness(test_config());
        let t = warm_up(&mut h.machine);
        h.machine.process(sample(t, 80));

        assert_eq!(h.machine.process(sample(t + 5, 60)), Step::RecoveryStarted);
        assert_eq!(h.machine.recovery_start_time(), Some(sample(t + 5, 60).timestamp));
        assert_eq!(
            h.machine.process(sample(t + 20, 60)),
            Step::Recovering {
                stable_for: Duration::seconds(15)
            }
        );
        assert_eq!(
            h.machine.process(sample(t + 35, 60)),
            Step::Recovered {
                stabilized_for: Duration::seconds(30)
            }
        );

        assert_eq!(h.machine.phase(), Phase::Monitoring);
        assert!(h.machine.recovery_start_time().is_none());
        // Cooldown survives recovery
        assert!(h.machine.last_cue_time().is_some());

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            ProtocolEvent::Recovered {
                at: sample(t + 35, 60).timestamp,
                stabilized_for: Duration::seconds(30),
            }
        );
    }

    #[test]
    fn test_anomaly_resets_recovery() {
        let mut h = harness(test_config());
        let t = warm_up(&mut h.machine);
        h.machine.process(sample(t, 80));
        h.machine.process(sample(t + 5, 60));

        assert_eq!(h.machine.process(sample(t + 10, 90)), Step::RecoveryReset);
        assert!(h.machine.recovery_start_time().is_none());
        assert!(h.machine.in_distress());
        assert_eq!(h.sink.count_of(event_types::RECOVERY_RESET), 1);

        // 35s after the first calm sample, but only 20s after the restart
        assert_eq!(h.machine.process(sample(t + 20, 60)), Step::RecoveryStarted);
        assert!(matches!(
            h.machine.process(sample(t + 40, 60)),
            Step::Recovering { .. }
        ));
        assert!(matches!(
            h.machine.process(sample(t + 50, 60)),
            Step::Recovered { stabilized_for } if stabilized_for == Duration::seconds(30)
        ));

        let recovered = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, ProtocolEvent::Recovered { .. }))
            .count();
        assert_eq!(recovered, 1);
    }

    #[test]
    fn test_cooldown_suppresses_second_detection() {
        let mut h = harness(test_config());
        let t = warm_up(&mut h.machine);
        h.machine.process(sample(t, 80));
        h.machine.process(sample(t + 1, 60));
        h.machine.process(sample(t + 31, 60));
        assert_eq!(h.machine.phase(), Phase::Monitoring);

        let step = h.machine.process(sample(t + 40, 90));
        assert_eq!(
            step,
            Step::Suppressed {
                remaining: Duration::seconds(20)
            }
        );
        assert_eq!(h.sink.count_of(event_types::DETECTION_SUPPRESSED), 1);
        assert_eq!(h.machine.phase(), Phase::Monitoring);

        // Exactly at the cooldown boundary detection is allowed again
        assert!(matches!(
            h.machine.process(sample(t + 60, 95)),
            Step::DistressDetected { .. }
        ));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut h = harness(test_config());
        let t = warm_up(&mut h.machine);
        h.machine.process(sample(t, 80));
        assert!(h.machine.in_distress());

        h.machine.reset();
        assert!(!h.machine.in_distress());
        assert!(h.machine.last_cue_time().is_none());
        assert_eq!(h.machine.buffered_samples(), 0);
        assert_eq!(h.machine.process(sample(t + 1, 80)), Step::Warmup);
    }

    #[test]
    fn test_stale_sample_is_skipped() {
        let mut h = harness(DetectorConfig {
            window_secs: 60,
            ..test_config()
        });
        let t = warm_up(&mut h.machine);
        h.machine.process(sample(t + 100, 60));

        assert_eq!(h.machine.process(sample(0, 200)), Step::Stale);
        assert_eq!(h.machine.phase(), Phase::Monitoring);
    }
}
