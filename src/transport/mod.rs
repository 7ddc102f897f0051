//! The radio stack seam.
//!
//! The link layer never talks to a Bluetooth stack directly. It issues
//! requests through [`TransportAdapter`] and the adapter reports completions
//! back as [`LinkEvent`]s posted to a [`LinkHandle`]. Requests must return
//! immediately; the adapter is expected to post events from its own callback
//! context.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::link::DeviceHandle;

pub mod in_memory;

/// How a characteristic write should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// Requests the link layer can make of the radio stack.
pub trait TransportAdapter: Send {
    fn start_scan(&mut self) -> anyhow::Result<()>;

    fn stop_scan(&mut self) -> anyhow::Result<()>;

    /// Connect, or reattach by address if the device is already bonded.
    fn connect(&mut self, device: &DeviceHandle) -> anyhow::Result<()>;

    /// Tear down the connection to `device`.
    fn cancel_connection(&mut self, device: &DeviceHandle) -> anyhow::Result<()>;

    fn discover_services(&mut self, services: &[Uuid]) -> anyhow::Result<()>;

    fn discover_characteristics(
        &mut self,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> anyhow::Result<()>;

    /// Ask the device to push value updates for `characteristic`.
    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> anyhow::Result<()>;

    fn read(&mut self, characteristic: Uuid) -> anyhow::Result<()>;

    fn write(&mut self, characteristic: Uuid, data: &[u8], kind: WriteKind) -> anyhow::Result<()>;
}

/// Callbacks delivered to the link layer, in order, on a single inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    AdapterState { powered_on: bool },
    DeviceDiscovered(DeviceHandle),
    Connected,
    ConnectFailed { reason: String },
    ServicesDiscovered(Vec<Uuid>),
    CharacteristicsDiscovered { service: Uuid, characteristics: Vec<Uuid> },
    ValueUpdated { characteristic: Uuid, value: Vec<u8> },
    WriteCompleted { characteristic: Uuid, error: Option<String> },
    Disconnected { reason: Option<String> },
    PeriodicTick { generation: u64 },
    /// Stops the event loop.
    Shutdown,
}

pub type LinkInbox = mpsc::UnboundedReceiver<LinkEvent>;

/// Posting side of the link inbox.
///
/// Holding a handle does not keep any session state alive; it only queues
/// events for whoever drains the inbox.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkHandle {
    /// Returns false once the inbox has been dropped.
    pub fn post(&self, event: LinkEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(LinkEvent::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a link inbox and its posting handle.
pub fn channel() -> (LinkHandle, LinkInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LinkHandle { tx }, rx)
}
