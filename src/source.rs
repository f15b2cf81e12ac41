//! Sample source plumbing
//!
//! A source is any ordered stream of samples that may also yield transport
//! errors. The stream ending means the source has terminated.

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::models::BioSample;

/// Item yielded by a sample source
pub type SourceItem = Result<BioSample, SourceError>;

/// Boxed sample stream handed to the monitor
pub type SampleStream = BoxStream<'static, SourceItem>;

/// Stream a fixed list of samples
pub fn from_samples(samples: Vec<BioSample>) -> SampleStream {
    stream::iter(samples.into_iter().map(Ok)).boxed()
}

/// Stream a fixed list of samples and errors, in order
pub fn from_items(items: Vec<SourceItem>) -> SampleStream {
    stream::iter(items).boxed()
}

/// Push side of a channel-backed source
#[derive(Debug, Clone)]
pub struct SampleSender {
    tx: mpsc::Sender<SourceItem>,
}

impl SampleSender {
    /// Deliver a sample. Returns false once the stream side is gone.
    pub async fn send(&self, sample: BioSample) -> bool {
        self.tx.send(Ok(sample)).await.is_ok()
    }

    /// Deliver a transport error
    pub async fn send_error(&self, error: SourceError) -> bool {
        self.tx.send(Err(error)).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Channel-backed source for live integrations such as a BLE reader task.
///
/// The stream ends when every sender has been dropped.
pub fn channel(capacity: usize) -> (SampleSender, SampleStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed();
    (SampleSender { tx }, stream)
}
