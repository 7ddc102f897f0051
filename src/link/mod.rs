//! Connection lifecycle and command dispatch for the paired ring.
//!
//! [`LinkStateMachine`] is driven entirely by [`LinkEvent`]s coming from the
//! transport adapter and by imperative requests from the presentation layer.
//! Nothing here blocks: every adapter request returns immediately and its
//! outcome arrives later as another event.

mod device;
mod periodic;

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::time::Duration;
use uuid::Uuid;

pub use device::{AuthorizationState, ChannelRole, DeviceHandle, DeviceInfo, LinkSession};
pub use periodic::PeriodicStatus;

use crate::config::{
    LinkConfig, AUXILIARY_SERVICE, COMMAND_IN_CHARACTERISTIC, COMMAND_SERVICE,
    DEVICE_INFO_SERVICE, FIRMWARE_REVISION_CHARACTERISTIC, HARDWARE_REVISION_CHARACTERISTIC,
    NOTIFY_OUT_CHARACTERISTIC, REQUIRED_SERVICES,
};
use crate::error::LinkError;
use crate::protocol::{self, ChecksumPolicy, Frame, OutboundCommand};
use crate::sync::LinkObserver;
use crate::transport::{LinkEvent, LinkHandle, LinkInbox, TransportAdapter, WriteKind};
use periodic::PeriodicReport;

/// Lifecycle states of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    ServiceDiscovery,
    CharacteristicDiscovery,
    Ready,
    Disconnecting,
}

pub struct LinkStateMachine {
    config: LinkConfig,
    adapter: Box<dyn TransportAdapter>,
    observer: Box<dyn LinkObserver>,
    inbox: LinkHandle,
    state: LinkState,
    bonded: Option<DeviceHandle>,
    session: Option<LinkSession>,
    device_info: DeviceInfo,
    periodic: Option<PeriodicReport>,
    periodic_generation: u64,
}

impl LinkStateMachine {
    /// `inbox` must post into the same channel the adapter reports to.
    pub fn new(
        config: LinkConfig,
        adapter: Box<dyn TransportAdapter>,
        observer: Box<dyn LinkObserver>,
        inbox: LinkHandle,
    ) -> Self {
        Self {
            config,
            adapter,
            observer,
            inbox,
            state: LinkState::Idle,
            bonded: None,
            session: None,
            device_info: DeviceInfo::default(),
            periodic: None,
            periodic_generation: 0,
        }
    }

    /// Start with a previously bonded ring so the link can reattach directly.
    pub fn with_bonded(mut self, device: DeviceHandle) -> Self {
        self.bonded = Some(device);
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready && self.session.as_ref().is_some_and(LinkSession::is_ready)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn bonded_device(&self) -> Option<&DeviceHandle> {
        self.bonded.as_ref()
    }

    pub fn session(&self) -> Option<&LinkSession> {
        self.session.as_ref()
    }

    pub fn periodic_active(&self) -> bool {
        self.periodic.is_some()
    }

    /// Apply one adapter callback.
    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::AdapterState { powered_on } => self.on_adapter_state(powered_on),
            LinkEvent::DeviceDiscovered(device) => {
                debug!("Discovered {} ({})", device.display_name, device.address);
                self.observer.on_discovered(&device);
            }
            LinkEvent::Connected => self.on_connected(),
            LinkEvent::ConnectFailed { reason } => self.on_connect_failed(&reason),
            LinkEvent::ServicesDiscovered(services) => self.on_services_discovered(&services),
            LinkEvent::CharacteristicsDiscovered {
                service,
                characteristics,
            } => self.on_characteristics_discovered(service, &characteristics),
            LinkEvent::ValueUpdated {
                characteristic,
                value,
            } => self.on_value_updated(characteristic, &value),
            LinkEvent::WriteCompleted {
                characteristic,
                error,
            } => match error {
                None => debug!("Write to {} confirmed", characteristic),
                Some(e) => warn!("Write to {} failed: {}", characteristic, e),
            },
            LinkEvent::Disconnected { reason } => {
                match reason {
                    Some(r) => info!("Link dropped: {}", r),
                    None => info!("Link closed"),
                }
                self.teardown();
            }
            LinkEvent::PeriodicTick { generation } => self.on_periodic_tick(generation),
            LinkEvent::Shutdown => {}
        }
    }

    fn on_adapter_state(&mut self, powered_on: bool) {
        if !powered_on {
            info!("Adapter powered off");
            if self.state != LinkState::Idle {
                self.teardown();
            }
            return;
        }

        info!("Adapter available");
        if self.state != LinkState::Idle {
            return;
        }
        match self.bonded.clone() {
            Some(device) => {
                info!("Reattaching to bonded device {}", device.display_name);
                if let Err(e) = self.begin_connect(device) {
                    warn!("Reattach failed: {}", e);
                }
            }
            None => debug!("No bonded device, waiting for a scan request"),
        }
    }

    /// Begin scanning on behalf of the pairing flow.
    pub fn start_scan(&mut self) -> Result<(), LinkError> {
        if self.state != LinkState::Idle {
            return Err(LinkError::InvalidState { state: self.state });
        }
        self.adapter.start_scan().map_err(transport_error)?;
        self.state = LinkState::Scanning;
        info!("Scanning for devices");
        Ok(())
    }

    pub fn stop_scan(&mut self) -> Result<(), LinkError> {
        if self.state != LinkState::Scanning {
            return Err(LinkError::InvalidState { state: self.state });
        }
        self.state = LinkState::Idle;
        self.adapter.stop_scan().map_err(transport_error)
    }

    /// Connect to `device` and remember it for later reattachment.
    pub fn connect(&mut self, device: DeviceHandle) -> Result<(), LinkError> {
        match self.state {
            LinkState::Idle => {}
            LinkState::Scanning => {
                if let Err(e) = self.adapter.stop_scan() {
                    warn!("Failed to stop scan before connecting: {:#}", e);
                }
                self.state = LinkState::Idle;
            }
            state => return Err(LinkError::InvalidState { state }),
        }
        self.begin_connect(device)
    }

    fn begin_connect(&mut self, device: DeviceHandle) -> Result<(), LinkError> {
        self.bonded = Some(device.clone());
        self.state = LinkState::Connecting;
        info!("Connecting to {} ({})", device.display_name, device.address);
        if let Err(e) = self.adapter.connect(&device) {
            error!("Connect request failed: {:#}", e);
            self.state = LinkState::Idle;
            return Err(transport_error(e));
        }
        Ok(())
    }

    fn on_connect_failed(&mut self, reason: &str) {
        warn!("Failed to connect: {}", reason);
        // A cancelled attempt may also report back as a failure.
        if matches!(self.state, LinkState::Connecting | LinkState::Disconnecting) {
            self.teardown();
        }
    }

    fn on_connected(&mut self) {
        if self.state != LinkState::Connecting {
            warn!("Unexpected connect callback in state {:?}", self.state);
            return;
        }
        let Some(device) = self.bonded.clone() else {
            warn!("Connected without a target device");
            return;
        };

        info!("Connected to {}", device.display_name);
        self.session = Some(LinkSession::new(device));
        self.device_info = DeviceInfo::default();
        self.state = LinkState::ServiceDiscovery;
        if let Err(e) = self.adapter.discover_services(&REQUIRED_SERVICES) {
            error!("Service discovery request failed: {:#}", e);
            self.disconnect();
        }
    }

    fn on_services_discovered(&mut self, services: &[Uuid]) {
        if !matches!(
            self.state,
            LinkState::ServiceDiscovery | LinkState::CharacteristicDiscovery | LinkState::Ready
        ) {
            warn!("Ignoring service discovery in state {:?}", self.state);
            return;
        }
        if self.state == LinkState::ServiceDiscovery {
            self.state = LinkState::CharacteristicDiscovery;
        }

        for &service in services {
            let wanted: &[Uuid] = match service {
                COMMAND_SERVICE => &[COMMAND_IN_CHARACTERISTIC, NOTIFY_OUT_CHARACTERISTIC],
                DEVICE_INFO_SERVICE => &[
                    HARDWARE_REVISION_CHARACTERISTIC,
                    FIRMWARE_REVISION_CHARACTERISTIC,
                ],
                AUXILIARY_SERVICE => continue,
                other => {
                    debug!("Ignoring unexpected service {}", other);
                    continue;
                }
            };
            if let Err(e) = self.adapter.discover_characteristics(service, wanted) {
                error!("Characteristic discovery for {} failed: {:#}", service, e);
            }
        }
    }

    fn on_characteristics_discovered(&mut self, service: Uuid, characteristics: &[Uuid]) {
        if !matches!(
            self.state,
            LinkState::CharacteristicDiscovery | LinkState::Ready
        ) {
            warn!("Ignoring characteristics of {} in state {:?}", service, self.state);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        for &uuid in characteristics {
            let Some(role) = ChannelRole::from_uuid(uuid) else {
                debug!("Ignoring characteristic {} of {}", uuid, service);
                continue;
            };
            session.resolve(role, uuid);
            let request = match role {
                ChannelRole::NotifyOut => self.adapter.set_notify(uuid, true),
                ChannelRole::HardwareRevision | ChannelRole::FirmwareRevision => {
                    self.adapter.read(uuid)
                }
                ChannelRole::CommandIn => Ok(()),
            };
            if let Err(e) = request {
                error!("Request for {:?} channel failed: {:#}", role, e);
            }
        }

        self.check_ready();
    }

    fn check_ready(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.command_channels_resolved() || !session.mark_ready() {
            return;
        }

        self.state = LinkState::Ready;
        let device = session.device.clone();
        info!("Link ready with {}", device.display_name);
        let commands = self.observer.on_ready(&device);
        self.send_all(commands);
    }

    fn on_value_updated(&mut self, characteristic: Uuid, value: &[u8]) {
        let role = self.session.as_ref().and_then(|s| s.role_of(characteristic));
        match role {
            Some(ChannelRole::NotifyOut) => {
                let decoded = match self.config.checksum_policy {
                    ChecksumPolicy::Ignore => protocol::decode(value),
                    ChecksumPolicy::Verify => protocol::decode_verified(value),
                };
                match decoded {
                    Ok(frame) => {
                        debug!("<- cmd {:#04x} payload {:02X?}", frame.command, frame.payload);
                        let replies = self.observer.on_packet(frame);
                        self.send_all(replies);
                    }
                    Err(e) => warn!("Dropping notification: {}", e),
                }
            }
            Some(ChannelRole::HardwareRevision) => {
                if let Some(text) = identity_text(value) {
                    info!("Hardware revision: {}", text);
                    self.device_info.hardware_revision = Some(text);
                }
            }
            Some(ChannelRole::FirmwareRevision) => {
                if let Some(text) = identity_text(value) {
                    info!("Firmware revision: {}", text);
                    self.device_info.firmware_revision = Some(text);
                }
            }
            Some(ChannelRole::CommandIn) | None => {
                debug!("Ignoring update on {}", characteristic);
            }
        }
    }

    /// Send a command on the command-in channel.
    pub fn send_command(&mut self, command: u8, payload: &[u8]) -> Result<Frame, LinkError> {
        let target = self.session.as_ref().and_then(|s| s.command_in);
        match target {
            Some(target) => self.send_command_to(target, command, payload),
            None => {
                warn!("Command {:#04x} dropped: link not ready", command);
                Err(LinkError::NotReady { state: self.state })
            }
        }
    }

    /// Send a command to an explicit characteristic.
    pub fn send_command_to(
        &mut self,
        characteristic: Uuid,
        command: u8,
        payload: &[u8],
    ) -> Result<Frame, LinkError> {
        if !self.is_ready() {
            warn!("Command {:#04x} dropped: link not ready ({:?})", command, self.state);
            return Err(LinkError::NotReady { state: self.state });
        }

        let frame = Frame::encode(command, payload).map_err(|e| {
            warn!("Command {:#04x} rejected: {}", command, e);
            LinkError::from(e)
        })?;
        frame.verify()?;

        debug!("-> {:?}", frame);
        self.adapter
            .write(characteristic, frame.as_ref(), WriteKind::WithResponse)
            .map_err(|e| {
                error!("Write of command {:#04x} failed: {:#}", command, e);
                transport_error(e)
            })?;
        Ok(frame)
    }

    fn send_all(&mut self, commands: Vec<OutboundCommand>) {
        for cmd in commands {
            if let Err(e) = self.send_command(cmd.command, &cmd.payload) {
                warn!("Queued command {:#04x} not sent: {}", cmd.command, e);
            }
        }
    }

    /// Resend `command` every `every` until stopped or disconnected.
    pub fn start_periodic(
        &mut self,
        command: OutboundCommand,
        every: Duration,
    ) -> Result<PeriodicStatus, LinkError> {
        if !self.is_ready() {
            return Err(LinkError::NotReady { state: self.state });
        }
        Frame::encode(command.command, &command.payload)?;

        self.stop_periodic();
        self.periodic_generation += 1;
        let report = PeriodicReport::spawn(
            self.inbox.clone(),
            self.periodic_generation,
            command,
            every,
        )?;
        let status = report.status();
        info!("Periodic report {} started", report.generation);
        self.periodic = Some(report);
        Ok(status)
    }

    pub fn stop_periodic(&mut self) {
        if let Some(report) = self.periodic.take() {
            report.halt();
        }
    }

    fn on_periodic_tick(&mut self, generation: u64) {
        let command = match &self.periodic {
            Some(report) if report.generation == generation => report.command.clone(),
            _ => {
                debug!("Dropping stale periodic tick {}", generation);
                return;
            }
        };
        if let Err(e) = self.send_command(command.command, &command.payload) {
            warn!("Periodic command {:#04x} failed: {}", command.command, e);
        }
    }

    /// Close the link. Periodic reporting stops before the adapter is asked
    /// to tear down the connection.
    pub fn disconnect(&mut self) {
        self.stop_periodic();

        let device = match self.state {
            LinkState::Idle => {
                debug!("Disconnect requested while idle");
                return;
            }
            LinkState::Scanning => {
                self.state = LinkState::Idle;
                if let Err(e) = self.adapter.stop_scan() {
                    warn!("Failed to stop scan: {:#}", e);
                }
                return;
            }
            LinkState::Disconnecting => return,
            _ => self
                .session
                .as_ref()
                .map(|s| s.device.clone())
                .or_else(|| self.bonded.clone()),
        };

        let Some(device) = device else {
            self.teardown();
            return;
        };

        info!("Disconnecting from {}", device.display_name);
        self.state = LinkState::Disconnecting;
        if let Err(e) = self.adapter.cancel_connection(&device) {
            warn!("Cancel connection failed: {:#}", e);
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        self.stop_periodic();
        let was_connected = self.session.take().is_some();
        self.state = LinkState::Idle;
        if was_connected {
            self.observer.on_disconnected();
        }
    }
}

fn transport_error(e: anyhow::Error) -> LinkError {
    LinkError::Transport(format!("{:#}", e))
}

fn identity_text(value: &[u8]) -> Option<String> {
    match std::str::from_utf8(value) {
        Ok(text) => Some(text.trim_end_matches('\0').to_string()),
        Err(e) => {
            warn!("Device identity value is not UTF-8: {}", e);
            None
        }
    }
}

/// Drain `inbox` into `link` until shutdown or until every handle is gone.
pub async fn drive(link: Arc<Mutex<LinkStateMachine>>, mut inbox: LinkInbox) {
    while let Some(event) = inbox.recv().await {
        if event == LinkEvent::Shutdown {
            debug!("Link event loop stopping");
            break;
        }
        link.lock().await.handle_event(event);
    }
}
