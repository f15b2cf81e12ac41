// Library interface for SleepGuard modules
// Integration tests and the CLI both go through this crate root

pub mod audio;
pub mod baseline;
pub mod config;
pub mod detector;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod logging;
pub mod machine;
pub mod models;
pub mod monitor;
pub mod replay;
pub mod source;
pub mod window;

// Re-export commonly used types for convenience
pub use models::*;
pub use audio::{AudioCuePort, SilentAudio};
pub use baseline::BaselineStats;
pub use config::{AppConfig, DetectorConfig};
pub use detector::AnomalyDetector;
pub use diagnostics::{DiagnosticRecord, DiagnosticSink, MemorySink, TracingSink};
pub use error::{AudioError, Result, SleepGuardError, SourceError};
pub use events::EventEmitter;
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use machine::{Phase, StateMachine, Step};
pub use monitor::{DistressMonitor, MonitorSnapshot};
pub use source::{SampleStream, SourceItem};
pub use window::SlidingWindow;
