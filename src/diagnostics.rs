//! Diagnostic records and the sinks that receive them
//!
//! Every internal transition of the monitor produces one flat
//! [`DiagnosticRecord`]. Persisting or exporting the records is the sink's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Diagnostic event type names
pub mod event_types {
    pub const MONITOR_STARTED: &str = "monitor_started";
    pub const MONITOR_STOPPED: &str = "monitor_stopped";
    pub const DISTRESS_DETECTED: &str = "distress_detected";
    pub const DETECTION_SUPPRESSED: &str = "detection_suppressed";
    pub const CUE_REQUESTED: &str = "cue_requested";
    pub const CUE_PLAYED: &str = "cue_played";
    pub const CUE_FAILED: &str = "cue_failed";
    pub const RECOVERY_STARTED: &str = "recovery_started";
    pub const RECOVERY_RESET: &str = "recovery_reset";
    pub const RECOVERED: &str = "recovered";
    pub const SOURCE_ERROR: &str = "source_error";
    pub const SOURCE_ENDED: &str = "source_ended";
}

/// One flat log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub at: DateTime<Utc>,
    pub event_type: String,
    pub metadata: BTreeMap<String, Value>,
}

impl DiagnosticRecord {
    pub fn new(at: DateTime<Utc>, event_type: impl Into<String>) -> Self {
        Self {
            at,
            event_type: event_type.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// Receiver of diagnostic records.
///
/// Implementations must return quickly and must not panic.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, record: DiagnosticRecord);
}

impl<F> DiagnosticSink for F
where
    F: Fn(DiagnosticRecord) + Send + Sync,
{
    fn record(&self, record: DiagnosticRecord) {
        self(record)
    }
}

/// Forwards records to the `tracing` system
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, record: DiagnosticRecord) {
        let metadata = serde_json::to_string(&record.metadata).unwrap_or_default();
        match record.event_type.as_str() {
            event_types::SOURCE_ERROR | event_types::CUE_FAILED => {
                warn!(event = %record.event_type, at = %record.at, %metadata, "diagnostic")
            }
            event_types::DISTRESS_DETECTED
            | event_types::RECOVERED
            | event_types::MONITOR_STARTED
            | event_types::MONITOR_STOPPED => {
                info!(event = %record.event_type, at = %record.at, %metadata, "diagnostic")
            }
            _ => debug!(event = %record.event_type, at = %record.at, %metadata, "diagnostic"),
        }
    }
}

/// Append-only in-memory record log, cheap to clone and share
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<DiagnosticRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record so far
    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of records with the given event type
    pub fn count_of(&self, event_type: &str) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|r| r.event_type == event_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the log as JSON lines for hand-off to an exporter
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for record in self.records() {
            out.push_str(&serde_json::to_string(&record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, record: DiagnosticRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }
}

/// Sink handle that stamps every record with a monitor session id
#[derive(Clone)]
pub struct SessionSink {
    sink: Arc<dyn DiagnosticSink>,
    session_id: Uuid,
}

impl SessionSink {
    pub fn new(sink: Arc<dyn DiagnosticSink>, session_id: Uuid) -> Self {
        Self { sink, session_id }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn emit(&self, record: DiagnosticRecord) {
        self.sink
            .record(record.with("session_id", self.session_id.to_string()));
    }
}

impl std::fmt::Debug for SessionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSink")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Sends each record to several sinks in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl DiagnosticSink for FanoutSink {
    fn record(&self, record: DiagnosticRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(record.clone());
            }
            last.record(record);
        }
    }
}
