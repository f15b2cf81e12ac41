//! Protocol event fan-out

use tokio::sync::broadcast;

use crate::models::ProtocolEvent;

/// Multi-subscriber broadcast of [`ProtocolEvent`]s.
///
/// Subscribers only see events published after they subscribed. Dropping the
/// receiver is the only cancellation needed.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<ProtocolEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new receiver.
    ///
    /// The channel is bounded by the configured capacity. A receiver that
    /// falls further behind loses the oldest events and its next `recv`
    /// returns `RecvError::Lagged(n)` with the number skipped. Other
    /// receivers and the state machine are not affected.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: ProtocolEvent) {
        tracing::debug!(event = event.name(), at = %event.at(), "protocol event");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
