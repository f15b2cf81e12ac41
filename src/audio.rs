//! Audio cue port consumed by the monitor

use async_trait::async_trait;
use tracing::debug;

use crate::error::AudioError;

/// Capability to play a calming cue.
///
/// Playback runs off the sample path; the monitor never waits on it.
#[async_trait]
pub trait AudioCuePort: Send + Sync {
    /// Play the low-volume calming cue, resolving once playback finished or failed
    async fn play_low_volume_cue(&self) -> Result<(), AudioError>;

    /// Stop any cue currently playing
    async fn stop(&self);
}

/// Port that plays nothing and always succeeds, for offline replays
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentAudio;

#[async_trait]
impl AudioCuePort for SilentAudio {
    async fn play_low_volume_cue(&self) -> Result<(), AudioError> {
        debug!("silent cue");
        Ok(())
    }

    async fn stop(&self) {}
}
