//! Unified error hierarchy for SleepGuard
//!
//! Errors never escape the detection path: they are classified here and then
//! surfaced through the diagnostic sink and the tracing system.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all SleepGuard operations
#[derive(Debug, Error)]
pub enum SleepGuardError {
    /// Sample stream transport errors
    #[error("Sample source error: {0}")]
    Source(#[from] SourceError),

    /// Audio cue playback errors
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by a sample source while streaming
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// The underlying transport (BLE link, socket, file) failed
    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    /// A record could not be decoded into a sample
    #[error("Malformed sample at record {record}: {reason}")]
    Malformed { record: u64, reason: String },

    /// The device stopped reporting for a while
    #[error("Sensor disconnected: {device}")]
    Disconnected { device: String },
}

/// Errors raised by the audio cue port
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AudioError {
    /// The audio output device is unavailable
    #[error("Audio device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    /// Playback started but did not complete
    #[error("Playback failed: {reason}")]
    PlaybackFailed { reason: String },

    /// The cue asset could not be loaded
    #[error("Cue asset missing: {asset}")]
    AssetMissing { asset: String },
}

/// Configuration validation and loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric threshold is outside its accepted range
    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// The configuration file could not be parsed
    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Result type alias for SleepGuard operations
pub type Result<T> = std::result::Result<T, SleepGuardError>;

impl SleepGuardError {
    /// Transient errors are absorbed and monitoring continues
    pub fn is_transient(&self) -> bool {
        matches!(self, SleepGuardError::Source(_) | SleepGuardError::Audio(_))
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SleepGuardError::Source(SourceError::Malformed { .. }) => ErrorSeverity::Info,
            SleepGuardError::Source(_) => ErrorSeverity::Warning,
            SleepGuardError::Audio(_) => ErrorSeverity::Warning,
            SleepGuardError::Configuration(_) => ErrorSeverity::Error,
            SleepGuardError::Io(_) => ErrorSeverity::Error,
            SleepGuardError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// Short machine-readable tag used in diagnostic metadata
    pub fn kind(&self) -> &'static str {
        match self {
            SleepGuardError::Source(SourceError::Transport { .. }) => "transport",
            SleepGuardError::Source(SourceError::Malformed { .. }) => "malformed",
            SleepGuardError::Source(SourceError::Disconnected { .. }) => "disconnected",
            SleepGuardError::Audio(_) => "audio",
            SleepGuardError::Configuration(_) => "configuration",
            SleepGuardError::Io(_) => "io",
            SleepGuardError::Internal(_) => "internal",
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}
