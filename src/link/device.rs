use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{
    COMMAND_IN_CHARACTERISTIC, FIRMWARE_REVISION_CHARACTERISTIC, HARDWARE_REVISION_CHARACTERISTIC,
    NOTIFY_OUT_CHARACTERISTIC,
};

/// Authorization state reported by the pairing facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthorizationState {
    #[default]
    Unknown,
    Authorized,
    Denied,
}

/// The paired ring, as supplied by the external pairing facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub id: String,
    pub display_name: String,
    pub state: AuthorizationState,
    /// Stable address used to reattach without pairing again.
    pub address: String,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            state: AuthorizationState::Authorized,
            address: address.into(),
        }
    }
}

/// Identity strings read from the Device Information service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
}

/// Role a characteristic plays for the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    CommandIn,
    NotifyOut,
    HardwareRevision,
    FirmwareRevision,
}

impl ChannelRole {
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        match uuid {
            COMMAND_IN_CHARACTERISTIC => Some(ChannelRole::CommandIn),
            NOTIFY_OUT_CHARACTERISTIC => Some(ChannelRole::NotifyOut),
            HARDWARE_REVISION_CHARACTERISTIC => Some(ChannelRole::HardwareRevision),
            FIRMWARE_REVISION_CHARACTERISTIC => Some(ChannelRole::FirmwareRevision),
            _ => None,
        }
    }
}

/// Per-connection state. Dropped on disconnect.
#[derive(Debug, Clone)]
pub struct LinkSession {
    pub device: DeviceHandle,
    pub command_in: Option<Uuid>,
    pub notify_out: Option<Uuid>,
    pub hardware_revision: Option<Uuid>,
    pub firmware_revision: Option<Uuid>,
    ready: bool,
}

impl LinkSession {
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            command_in: None,
            notify_out: None,
            hardware_revision: None,
            firmware_revision: None,
            ready: false,
        }
    }

    pub fn command_channels_resolved(&self) -> bool {
        self.command_in.is_some() && self.notify_out.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Mark the session ready. Returns true only the first time.
    pub(crate) fn mark_ready(&mut self) -> bool {
        !std::mem::replace(&mut self.ready, true)
    }

    pub(crate) fn resolve(&mut self, role: ChannelRole, uuid: Uuid) {
        let slot = match role {
            ChannelRole::CommandIn => &mut self.command_in,
            ChannelRole::NotifyOut => &mut self.notify_out,
            ChannelRole::HardwareRevision => &mut self.hardware_revision,
            ChannelRole::FirmwareRevision => &mut self.firmware_revision,
        };
        *slot = Some(uuid);
    }

    pub fn role_of(&self, uuid: Uuid) -> Option<ChannelRole> {
        if self.notify_out == Some(uuid) {
            Some(ChannelRole::NotifyOut)
        } else if self.command_in == Some(uuid) {
            Some(ChannelRole::CommandIn)
        } else if self.hardware_revision == Some(uuid) {
            Some(ChannelRole::HardwareRevision)
        } else if self.firmware_revision == Some(uuid) {
            Some(ChannelRole::FirmwareRevision)
        } else {
            None
        }
    }
}
