pub mod config;
pub mod domain;
pub mod error;
pub mod link;
mod logging;
pub mod migrate;
pub mod protocol;
pub mod store;
pub mod sync;
pub mod transport;

pub use config::{LinkConfig, StoreConfig, StoreLocation};
pub use domain::*;
pub use error::{CodecError, LinkError, StoreError, StoreResult};
pub use link::{drive, DeviceHandle, DeviceInfo, LinkState, LinkStateMachine, PeriodicStatus};
pub use logging::{init_logging, LogFilter};
pub use migrate::{spawn_migration, LegacyMigrator, MigrationReport, MigrationStatus};
pub use protocol::{ChecksumPolicy, DecodedFrame, Frame, OutboundCommand, FRAME_LEN, MAX_PAYLOAD_LEN};
pub use store::{ExportBundle, MergeOutcome, StorageEngine};
pub use sync::{
    persist_batches, LinkObserver, PacketParser, ParseOutcome, SampleSink, SyncOrchestrator,
};
pub use transport::{LinkEvent, LinkHandle, TransportAdapter};
