use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::protocol::ChecksumPolicy;

/// Primary ring command service.
pub const COMMAND_SERVICE: Uuid = Uuid::from_u128(0x6e40fff0_b5a3_f393_e0a9_e50e24dcca9e);
/// Write characteristic for command frames.
pub const COMMAND_IN_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
/// Notify characteristic carrying the device's replies.
pub const NOTIFY_OUT_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Standard Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const HARDWARE_REVISION_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a27_0000_1000_8000_00805f9b34fb);
pub const FIRMWARE_REVISION_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);

/// Secondary vendor service. Discovered but not used.
pub const AUXILIARY_SERVICE: Uuid = Uuid::from_u128(0xde5bf728_d711_4e47_af26_65e3012a5dc7);

/// Services requested right after connecting.
pub const REQUIRED_SERVICES: [Uuid; 3] = [COMMAND_SERVICE, DEVICE_INFO_SERVICE, AUXILIARY_SERVICE];

/// Environment variable holding the default database path for the CLI.
pub const DB_PATH_ENV: &str = "RINGSYNC_DB";

/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Link layer settings.
#[derive(Debug, Clone, Default)]
pub struct LinkConfig {
    pub checksum_policy: ChecksumPolicy,
}

/// Where the sample store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Private scratch database in a temporary directory, removed with the
    /// engine.
    InMemory,
    File(PathBuf),
}

/// Sample store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub location: StoreLocation,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::InMemory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}
