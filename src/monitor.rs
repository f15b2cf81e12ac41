//! Async driver around the intervention state machine
//!
//! The monitor attaches a [`SampleStream`] and an [`AudioCuePort`] to one
//! [`StateMachine`]. A single Tokio task consumes the stream and processes one
//! sample at a time under a mutex. Cue playback is spawned on its own task so
//! the next sample is never held up by audio.
//!
//! `stop()` bumps a generation counter while holding the machine lock. Any
//! sample or audio completion that belongs to an older generation is dropped.

use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::AudioCuePort;
use crate::config::{AppConfig, DetectorConfig};
use crate::diagnostics::{event_types, DiagnosticRecord, DiagnosticSink, SessionSink};
use crate::error::SleepGuardError;
use crate::events::EventEmitter;
use crate::machine::{Phase, StateMachine, Step};
use crate::models::ProtocolEvent;
use crate::source::SampleStream;

/// Point-in-time view of a monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub session_id: Uuid,
    pub running: bool,
    pub phase: Phase,
    pub in_distress: bool,
    pub buffered_samples: usize,
    pub last_cue_time: Option<DateTime<Utc>>,
    pub generation: u64,
}

struct Shared {
    machine: Mutex<StateMachine>,
    generation: AtomicU64,
    events: EventEmitter,
    diagnostics: SessionSink,
    running: watch::Sender<bool>,
    cue_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn machine(&self) -> MutexGuard<'_, StateMachine> {
        self.machine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

struct Attachment {
    driver: JoinHandle<()>,
    audio: Arc<dyn AudioCuePort>,
}

/// Distress monitor for one sleeper/session
pub struct DistressMonitor {
    shared: Arc<Shared>,
    attachment: Mutex<Option<Attachment>>,
}

impl DistressMonitor {
    pub fn new(config: DetectorConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self::with_capacity(config, sink, 256)
    }

    /// Build from the application config
    pub fn from_app_config(config: &AppConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self::with_capacity(config.detector.clone(), sink, config.events.channel_capacity)
    }

    pub fn with_capacity(
        config: DetectorConfig,
        sink: Arc<dyn DiagnosticSink>,
        event_capacity: usize,
    ) -> Self {
        let events = EventEmitter::new(event_capacity);
        let diagnostics = SessionSink::new(sink, Uuid::new_v4());
        let machine = StateMachine::new(config, events.clone(), diagnostics.clone());
        let (running, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(machine),
                generation: AtomicU64::new(0),
                events,
                diagnostics,
                running,
                cue_tasks: Mutex::new(Vec::new()),
            }),
            attachment: Mutex::new(None),
        }
    }

    /// Subscribe to protocol events published from now on.
    ///
    /// Receivers lagging past `events.channel_capacity` get
    /// `RecvError::Lagged`, see [`EventEmitter::subscribe`].
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.shared.events.subscribe()
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.diagnostics.session_id()
    }

    /// Attach a sample source and audio port and begin processing.
    ///
    /// Must be called from within a Tokio runtime. Returns false while the
    /// current source is still running, in which case nothing changes. Once
    /// the source has ended a new one can be attached right away.
    pub fn start(&self, source: SampleStream, audio: Arc<dyn AudioCuePort>) -> bool {
        let mut attachment = self.attachment();
        // `running` drops to false under the machine lock as the last thing a
        // driver does, so a finished driver never blocks the next start
        if self.is_running() {
            debug!(session = %self.session_id(), "start ignored, already attached");
            return false;
        }

        let generation = self.shared.current_generation();
        self.shared.running.send_replace(true);
        info!(session = %self.session_id(), generation, "monitoring started");
        self.shared.diagnostics.emit(
            DiagnosticRecord::new(Utc::now(), event_types::MONITOR_STARTED)
                .with("generation", generation),
        );

        let driver = tokio::spawn(drive(
            self.shared.clone(),
            source,
            audio.clone(),
            generation,
        ));
        *attachment = Some(Attachment { driver, audio });
        true
    }

    /// Detach from the source and reset all state.
    ///
    /// No sample is processed once this returns. Safe to call when not started.
    pub fn stop(&self) {
        let attachment = self.attachment().take();

        {
            let mut machine = self.shared.machine();
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            machine.reset();
        }
        self.shared.running.send_replace(false);

        let Some(Attachment { driver, audio }) = attachment else {
            return;
        };
        driver.abort();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { audio.stop().await });
        }

        info!(session = %self.session_id(), "monitoring stopped");
        self.shared
            .diagnostics
            .emit(DiagnosticRecord::new(Utc::now(), event_types::MONITOR_STOPPED));
    }

    /// True while a source is attached and has not ended
    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    /// Resolve once the source ends or the monitor is stopped
    pub async fn wait_until_detached(&self) {
        let mut running = self.shared.running.subscribe();
        // Sender lives in `shared`, so this only errors if the monitor is gone
        let _ = running.wait_for(|running| !running).await;
    }

    /// Wait for every cue playback requested so far to finish
    pub async fn settle(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .shared
                .cue_tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in tasks {
            let _ = task.await;
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let machine = self.shared.machine();
        MonitorSnapshot {
            session_id: self.session_id(),
            running: self.is_running(),
            phase: machine.phase(),
            in_distress: machine.in_distress(),
            buffered_samples: machine.buffered_samples(),
            last_cue_time: machine.last_cue_time(),
            generation: self.shared.current_generation(),
        }
    }

    fn attachment(&self) -> MutexGuard<'_, Option<Attachment>> {
        self.attachment
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DistressMonitor {
    fn drop(&mut self) {
        if let Some(attachment) = self.attachment().take() {
            attachment.driver.abort();
        }
    }
}

async fn drive(
    shared: Arc<Shared>,
    mut source: SampleStream,
    audio: Arc<dyn AudioCuePort>,
    generation: u64,
) {
    while let Some(item) = source.next().await {
        match item {
            Ok(sample) => {
                let step = {
                    let mut machine = shared.machine();
                    if shared.current_generation() != generation {
                        return;
                    }
                    machine.process(sample)
                };

                if let Step::DistressDetected { at, detection } = step {
                    shared.diagnostics.emit(
                        DiagnosticRecord::new(at, event_types::CUE_REQUESTED)
                            .with("severity", detection.severity),
                    );
                    request_cue(&shared, audio.clone(), generation, at);
                }
            }
            Err(error) => {
                if shared.current_generation() != generation {
                    return;
                }
                let error = SleepGuardError::from(error);
                warn!(kind = error.kind(), %error, "sample source error, continuing");
                shared.diagnostics.emit(
                    DiagnosticRecord::new(Utc::now(), event_types::SOURCE_ERROR)
                        .with("kind", error.kind())
                        .with("message", error.to_string()),
                );
            }
        }
    }

    // Hold the lock so a concurrent stop() cannot interleave with the hand-off
    let _machine = shared.machine();
    if shared.current_generation() == generation {
        info!("sample source ended");
        shared
            .diagnostics
            .emit(DiagnosticRecord::new(Utc::now(), event_types::SOURCE_ENDED));
        shared.running.send_replace(false);
    }
}

/// Fire-and-forget cue playback. The result only produces an event and a record.
fn request_cue(
    shared: &Arc<Shared>,
    audio: Arc<dyn AudioCuePort>,
    generation: u64,
    detected_at: DateTime<Utc>,
) {
    let task_shared = shared.clone();
    let task = tokio::spawn(async move {
        let started = tokio::time::Instant::now();
        let result = audio.play_low_volume_cue().await;
        let elapsed = Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero());
        let at = detected_at.checked_add_signed(elapsed).unwrap_or(detected_at);

        let _machine = task_shared.machine();
        if task_shared.current_generation() != generation {
            debug!("cue completed after stop, ignored");
            return;
        }

        match result {
            Ok(()) => {
                debug!(at = %at, "cue played");
                task_shared.events.emit(ProtocolEvent::CuePlayed { at });
                task_shared.diagnostics.emit(
                    DiagnosticRecord::new(at, event_types::CUE_PLAYED)
                        .with("playback_ms", elapsed.num_milliseconds()),
                );
            }
            Err(error) => {
                let error = SleepGuardError::from(error);
                warn!(%error, "cue playback failed");
                task_shared.diagnostics.emit(
                    DiagnosticRecord::new(at, event_types::CUE_FAILED)
                        .with("message", error.to_string()),
                );
            }
        }
    });

    let mut tasks = shared
        .cue_tasks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    tasks.retain(|t| !t.is_finished());
    tasks.push(task);
}
