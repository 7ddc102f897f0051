//! Glue between the device link and the sample store.
//!
//! The link reports lifecycle changes and decoded frames to a
//! [`LinkObserver`]. [`SyncOrchestrator`] is the stock observer: it turns
//! frames into [`SampleBatch`]es through an injected [`PacketParser`] and
//! queues them for [`persist_batches`], which hands them to a
//! [`SampleSink`] one at a time, in arrival order.

use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::mpsc;

use crate::domain::SampleBatch;
use crate::error::StoreError;
use crate::link::DeviceHandle;
use crate::protocol::{DecodedFrame, OutboundCommand};
use crate::store::MergeOutcome;

/// Callbacks the link layer makes into the sync layer.
///
/// Returned commands are sent by the link, in order, right away.
pub trait LinkObserver: Send {
    /// A device showed up while scanning.
    fn on_discovered(&mut self, _device: &DeviceHandle) {}

    /// Post-connect initialization. Called exactly once per connection.
    fn on_ready(&mut self, device: &DeviceHandle) -> Vec<OutboundCommand>;

    /// A frame arrived on the notification channel.
    fn on_packet(&mut self, frame: DecodedFrame) -> Vec<OutboundCommand>;

    fn on_disconnected(&mut self) {}
}

/// Destination for typed sample batches.
#[async_trait::async_trait]
pub trait SampleSink: Send + Sync {
    async fn store(&self, batch: SampleBatch) -> Result<MergeOutcome, StoreError>;
}

/// What a parser made of one frame.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub batch: Option<SampleBatch>,
    /// Commands to send in response, e.g. a request for the next page.
    pub follow_up: Vec<OutboundCommand>,
}

/// Device-specific decoding of notification frames into samples.
pub trait PacketParser: Send {
    fn parse(&mut self, frame: &DecodedFrame) -> ParseOutcome;

    /// Forget any partially assembled response.
    fn reset(&mut self) {}
}

pub type BatchQueue = mpsc::UnboundedReceiver<SampleBatch>;

pub struct SyncOrchestrator<P: PacketParser> {
    parser: P,
    init_commands: Vec<OutboundCommand>,
    batches: mpsc::UnboundedSender<SampleBatch>,
}

impl<P: PacketParser> SyncOrchestrator<P> {
    /// `init_commands` are sent every time the link becomes ready.
    pub fn new(parser: P, init_commands: Vec<OutboundCommand>) -> (Self, BatchQueue) {
        let (batches, rx) = mpsc::unbounded_channel();
        (
            Self {
                parser,
                init_commands,
                batches,
            },
            rx,
        )
    }
}

impl<P: PacketParser> LinkObserver for SyncOrchestrator<P> {
    fn on_ready(&mut self, device: &DeviceHandle) -> Vec<OutboundCommand> {
        info!("Starting sync with {}", device.display_name);
        self.parser.reset();
        self.init_commands.clone()
    }

    fn on_packet(&mut self, frame: DecodedFrame) -> Vec<OutboundCommand> {
        let outcome = self.parser.parse(&frame);
        if let Some(batch) = outcome.batch.filter(|b| !b.is_empty()) {
            debug!("Parsed {} {} samples", batch.len(), batch.collection());
            if self.batches.send(batch).is_err() {
                error!("Batch queue closed; samples dropped");
            }
        }
        outcome.follow_up
    }

    fn on_disconnected(&mut self) {
        // Queued batches keep flowing to the store.
        self.parser.reset();
    }
}

/// Feed every queued batch to `sink`, one at a time. Returns when the
/// orchestrator is dropped and the queue is empty.
pub async fn persist_batches(mut queue: BatchQueue, sink: Arc<dyn SampleSink>) {
    while let Some(batch) = queue.recv().await {
        let collection = batch.collection();
        match sink.store(batch).await {
            Ok(outcome) => info!(
                "Stored {}: {} inserted, {} updated, {} unchanged",
                collection, outcome.inserted, outcome.updated, outcome.unchanged
            ),
            Err(e) => error!("Failed to store {} batch: {}", collection, e),
        }
    }
}
