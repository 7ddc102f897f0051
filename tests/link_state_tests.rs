use std::sync::{Arc, Mutex};
use std::time::Duration;

use ringsync::config::{
    AUXILIARY_SERVICE, COMMAND_IN_CHARACTERISTIC, COMMAND_SERVICE, DEVICE_INFO_SERVICE,
    FIRMWARE_REVISION_CHARACTERISTIC, HARDWARE_REVISION_CHARACTERISTIC,
    NOTIFY_OUT_CHARACTERISTIC, REQUIRED_SERVICES,
};
use ringsync::transport::in_memory::{AdapterCall, AdapterLog, RecordingAdapter};
use ringsync::transport::{self, LinkInbox, TransportAdapter, WriteKind};
use ringsync::{
    ChecksumPolicy, DecodedFrame, DeviceHandle, Frame, LinkConfig, LinkError, LinkEvent,
    LinkObserver, LinkState, LinkStateMachine, OutboundCommand, PeriodicStatus,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Ready(String),
    Packet(DecodedFrame),
    Disconnected,
}

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
    init: Vec<OutboundCommand>,
    replies: Vec<OutboundCommand>,
}

impl Recorder {
    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn ready_count(&self) -> usize {
        self.seen()
            .iter()
            .filter(|s| matches!(s, Seen::Ready(_)))
            .count()
    }
}

impl LinkObserver for Recorder {
    fn on_ready(&mut self, device: &DeviceHandle) -> Vec<OutboundCommand> {
        self.seen.lock().unwrap().push(Seen::Ready(device.id.clone()));
        self.init.clone()
    }

    fn on_packet(&mut self, frame: DecodedFrame) -> Vec<OutboundCommand> {
        self.seen.lock().unwrap().push(Seen::Packet(frame));
        self.replies.clone()
    }

    fn on_disconnected(&mut self) {
        self.seen.lock().unwrap().push(Seen::Disconnected);
    }
}

fn ring() -> DeviceHandle {
    DeviceHandle::new("ring-1", "R02_A1B2", "C0:FF:EE:00:00:01")
}

struct Harness {
    link: LinkStateMachine,
    log: AdapterLog,
    observer: Recorder,
    inbox: LinkInbox,
}

fn harness_with(config: LinkConfig, observer: Recorder) -> Harness {
    let (adapter, log) = RecordingAdapter::new();
    let (handle, inbox) = transport::channel();
    let link = LinkStateMachine::new(config, Box::new(adapter), Box::new(observer.clone()), handle);
    Harness {
        link,
        log,
        observer,
        inbox,
    }
}

fn harness() -> Harness {
    harness_with(LinkConfig::default(), Recorder::default())
}

fn command_channels() -> LinkEvent {
    LinkEvent::CharacteristicsDiscovered {
        service: COMMAND_SERVICE,
        characteristics: vec![COMMAND_IN_CHARACTERISTIC, NOTIFY_OUT_CHARACTERISTIC],
    }
}

fn connect_and_discover(link: &mut LinkStateMachine) {
    link.connect(ring()).unwrap();
    link.handle_event(LinkEvent::Connected);
    link.handle_event(LinkEvent::ServicesDiscovered(REQUIRED_SERVICES.to_vec()));
}

fn bring_up(link: &mut LinkStateMachine) {
    connect_and_discover(link);
    link.handle_event(command_channels());
    assert_eq!(link.state(), LinkState::Ready);
}

fn notification(bytes: Vec<u8>) -> LinkEvent {
    LinkEvent::ValueUpdated {
        characteristic: NOTIFY_OUT_CHARACTERISTIC,
        value: bytes,
    }
}

#[test]
fn connect_walks_through_discovery_to_ready() {
    let mut h = harness();
    h.link.connect(ring()).unwrap();
    assert_eq!(h.link.state(), LinkState::Connecting);

    h.link.handle_event(LinkEvent::Connected);
    assert_eq!(h.link.state(), LinkState::ServiceDiscovery);
    assert!(h.link.is_connected());

    h.link
        .handle_event(LinkEvent::ServicesDiscovered(REQUIRED_SERVICES.to_vec()));
    assert_eq!(h.link.state(), LinkState::CharacteristicDiscovery);

    h.link.handle_event(command_channels());
    assert_eq!(h.link.state(), LinkState::Ready);
    assert!(h.link.is_ready());
    assert_eq!(h.observer.seen(), vec![Seen::Ready("ring-1".into())]);

    let calls = h.log.calls();
    assert_eq!(
        calls[0],
        AdapterCall::Connect {
            address: "C0:FF:EE:00:00:01".into()
        }
    );
    assert!(calls.contains(&AdapterCall::DiscoverServices(REQUIRED_SERVICES.to_vec())));
    assert!(calls.contains(&AdapterCall::SetNotify {
        characteristic: NOTIFY_OUT_CHARACTERISTIC,
        enabled: true
    }));
}

#[test]
fn discovery_requests_only_known_characteristics() {
    let mut h = harness();
    connect_and_discover(&mut h.link);

    let requested: Vec<_> = h
        .log
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            AdapterCall::DiscoverCharacteristics {
                service,
                characteristics,
            } => Some((service, characteristics)),
            _ => None,
        })
        .collect();
    assert_eq!(
        requested,
        vec![
            (
                COMMAND_SERVICE,
                vec![COMMAND_IN_CHARACTERISTIC, NOTIFY_OUT_CHARACTERISTIC]
            ),
            (
                DEVICE_INFO_SERVICE,
                vec![
                    HARDWARE_REVISION_CHARACTERISTIC,
                    FIRMWARE_REVISION_CHARACTERISTIC
                ]
            ),
        ]
    );
    assert!(requested.iter().all(|(s, _)| *s != AUXILIARY_SERVICE));
}

#[test]
fn unexpected_service_is_ignored() {
    let mut h = harness();
    h.link.connect(ring()).unwrap();
    h.link.handle_event(LinkEvent::Connected);
    h.log.clear();

    let stranger = Uuid::from_u128(0x1234);
    h.link.handle_event(LinkEvent::ServicesDiscovered(vec![stranger]));
    assert_eq!(h.link.state(), LinkState::CharacteristicDiscovery);
    assert!(h.log.calls().is_empty());
}

#[test]
fn ready_fires_once_when_notify_resolves_first() {
    let mut h = harness();
    connect_and_discover(&mut h.link);

    h.link.handle_event(LinkEvent::CharacteristicsDiscovered {
        service: COMMAND_SERVICE,
        characteristics: vec![NOTIFY_OUT_CHARACTERISTIC],
    });
    assert_eq!(h.observer.ready_count(), 0);
    assert!(!h.link.is_ready());

    h.link.handle_event(LinkEvent::CharacteristicsDiscovered {
        service: COMMAND_SERVICE,
        characteristics: vec![COMMAND_IN_CHARACTERISTIC],
    });
    assert_eq!(h.observer.ready_count(), 1);

    // A repeated discovery callback must not re-run initialization.
    h.link.handle_event(command_channels());
    assert_eq!(h.observer.ready_count(), 1);
}

#[test]
fn ready_fires_once_when_command_in_resolves_first() {
    let mut h = harness();
    connect_and_discover(&mut h.link);

    h.link.handle_event(LinkEvent::CharacteristicsDiscovered {
        service: COMMAND_SERVICE,
        characteristics: vec![COMMAND_IN_CHARACTERISTIC],
    });
    assert_eq!(h.observer.ready_count(), 0);

    h.link.handle_event(LinkEvent::CharacteristicsDiscovered {
        service: COMMAND_SERVICE,
        characteristics: vec![NOTIFY_OUT_CHARACTERISTIC],
    });
    h.link.handle_event(LinkEvent::CharacteristicsDiscovered {
        service: DEVICE_INFO_SERVICE,
        characteristics: vec![HARDWARE_REVISION_CHARACTERISTIC],
    });
    assert_eq!(h.observer.ready_count(), 1);
}

#[test]
fn init_commands_are_written_on_ready() {
    let observer = Recorder {
        init: vec![OutboundCommand::new(0x01, vec![0xAA, 0xBB]), OutboundCommand::new(0x48, vec![])],
        ..Recorder::default()
    };
    let mut h = harness_with(LinkConfig::default(), observer);
    bring_up(&mut h.link);

    let writes: Vec<_> = h
        .log
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            AdapterCall::Write {
                characteristic,
                data,
                kind,
            } => Some((characteristic, data, kind)),
            _ => None,
        })
        .collect();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].0, COMMAND_IN_CHARACTERISTIC);
    assert_eq!(writes[0].2, WriteKind::WithResponse);
    assert_eq!(writes[0].1, Frame::encode(0x01, &[0xAA, 0xBB]).unwrap().as_ref());
    assert_eq!(writes[1].1[0], 0x48);
}

#[test]
fn send_before_ready_is_a_typed_error() {
    let mut h = harness();
    let err = h.link.send_command(0x01, &[]).unwrap_err();
    assert!(matches!(err, LinkError::NotReady { state: LinkState::Idle }));

    connect_and_discover(&mut h.link);
    let err = h.link.send_command(0x01, &[]).unwrap_err();
    assert!(matches!(
        err,
        LinkError::NotReady {
            state: LinkState::CharacteristicDiscovery
        }
    ));
    assert!(h.log.writes().is_empty());
}

#[test]
fn oversized_command_is_rejected_without_writing() {
    let mut h = harness();
    bring_up(&mut h.link);
    h.log.clear();

    let err = h.link.send_command(0x01, &[0u8; 15]).unwrap_err();
    assert!(matches!(err, LinkError::Codec(_)));
    assert!(h.log.writes().is_empty());
}

#[test]
fn failed_write_surfaces_as_transport_error() {
    let mut h = harness();
    bring_up(&mut h.link);
    h.log.set_fail_writes(true);

    let err = h.link.send_command(0x03, &[1]).unwrap_err();
    assert!(matches!(err, LinkError::Transport(_)));
    assert!(h.link.is_ready());
}

#[test]
fn notifications_reach_the_observer_and_replies_go_out() {
    let observer = Recorder {
        replies: vec![OutboundCommand::new(0x15, vec![0x01])],
        ..Recorder::default()
    };
    let mut h = harness_with(LinkConfig::default(), observer);
    bring_up(&mut h.link);
    h.log.clear();

    let mut bytes = vec![0u8; 16];
    bytes[0] = 0x15;
    bytes[1] = 0x07;
    bytes[15] = 0xEE; // wrong trailer, accepted under the default policy
    h.link.handle_event(notification(bytes));

    let packets: Vec<_> = h
        .observer
        .seen()
        .into_iter()
        .filter_map(|s| match s {
            Seen::Packet(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].command, 0x15);
    assert_eq!(packets[0].payload[0], 0x07);
    assert_eq!(h.log.writes().len(), 1);
}

#[test]
fn short_notifications_are_dropped() {
    let mut h = harness();
    bring_up(&mut h.link);
    h.link.handle_event(notification(vec![0x15, 0x01, 0x02]));
    assert!(!h
        .observer
        .seen()
        .iter()
        .any(|s| matches!(s, Seen::Packet(_))));
    assert!(h.link.is_ready());
}

#[test]
fn verify_policy_drops_bad_checksums() {
    let config = LinkConfig {
        checksum_policy: ChecksumPolicy::Verify,
    };
    let mut h = harness_with(config, Recorder::default());
    bring_up(&mut h.link);

    let good = Frame::encode(0x15, &[0x02]).unwrap().as_ref().to_vec();
    let mut bad = good.clone();
    bad[15] ^= 0xFF;
    h.link.handle_event(notification(bad));
    h.link.handle_event(notification(good));

    let packets = h
        .observer
        .seen()
        .into_iter()
        .filter(|s| matches!(s, Seen::Packet(_)))
        .count();
    assert_eq!(packets, 1);
}

#[test]
fn device_info_is_read_as_text() {
    let mut h = harness();
    bring_up(&mut h.link);
    h.link.handle_event(LinkEvent::CharacteristicsDiscovered {
        service: DEVICE_INFO_SERVICE,
        characteristics: vec![
            HARDWARE_REVISION_CHARACTERISTIC,
            FIRMWARE_REVISION_CHARACTERISTIC,
        ],
    });
    assert!(h
        .log
        .calls()
        .contains(&AdapterCall::Read(HARDWARE_REVISION_CHARACTERISTIC)));

    h.link.handle_event(LinkEvent::ValueUpdated {
        characteristic: HARDWARE_REVISION_CHARACTERISTIC,
        value: b"R02_V3.0\0".to_vec(),
    });
    h.link.handle_event(LinkEvent::ValueUpdated {
        characteristic: FIRMWARE_REVISION_CHARACTERISTIC,
        value: vec![0xFF, 0xFE],
    });

    assert_eq!(
        h.link.device_info().hardware_revision.as_deref(),
        Some("R02_V3.0")
    );
    assert_eq!(h.link.device_info().firmware_revision, None);
}

#[test]
fn connect_failure_returns_to_idle() {
    let mut h = harness();
    h.link.connect(ring()).unwrap();
    h.link.handle_event(LinkEvent::ConnectFailed {
        reason: "timeout".into(),
    });
    assert_eq!(h.link.state(), LinkState::Idle);
    assert!(!h.link.is_connected());

    h.log.set_fail_connect(true);
    let err = h.link.connect(ring()).unwrap_err();
    assert!(matches!(err, LinkError::Transport(_)));
    assert_eq!(h.link.state(), LinkState::Idle);
}

#[test]
fn connect_while_scanning_stops_the_scan() {
    let mut h = harness();
    h.link.start_scan().unwrap();
    assert_eq!(h.link.state(), LinkState::Scanning);
    h.link.connect(ring()).unwrap();

    let calls = h.log.calls();
    assert_eq!(calls[0], AdapterCall::StartScan);
    assert_eq!(calls[1], AdapterCall::StopScan);
    assert!(matches!(calls[2], AdapterCall::Connect { .. }));
    assert_eq!(h.link.state(), LinkState::Connecting);
}

#[test]
fn scan_is_refused_while_connected() {
    let mut h = harness();
    bring_up(&mut h.link);
    let err = h.link.start_scan().unwrap_err();
    assert!(matches!(
        err,
        LinkError::InvalidState {
            state: LinkState::Ready
        }
    ));
}

#[test]
fn bonded_device_reattaches_when_adapter_powers_on() {
    let (adapter, log) = RecordingAdapter::new();
    let (handle, _inbox) = transport::channel();
    let mut link = LinkStateMachine::new(
        LinkConfig::default(),
        Box::new(adapter),
        Box::new(Recorder::default()),
        handle,
    )
    .with_bonded(ring());

    link.handle_event(LinkEvent::AdapterState { powered_on: true });
    assert_eq!(link.state(), LinkState::Connecting);
    assert_eq!(
        log.calls(),
        vec![AdapterCall::Connect {
            address: "C0:FF:EE:00:00:01".into()
        }]
    );
}

#[test]
fn adapter_power_loss_tears_down_the_session() {
    let mut h = harness();
    bring_up(&mut h.link);
    h.link
        .handle_event(LinkEvent::AdapterState { powered_on: false });
    assert_eq!(h.link.state(), LinkState::Idle);
    assert!(!h.link.is_connected());
    assert_eq!(h.observer.seen().last(), Some(&Seen::Disconnected));
    assert_eq!(h.link.bonded_device(), Some(&ring()));
}

#[test]
fn disconnect_requests_cancel_then_idles_on_callback() {
    let mut h = harness();
    bring_up(&mut h.link);
    h.link.disconnect();
    assert_eq!(h.link.state(), LinkState::Disconnecting);
    assert!(h.log.calls().contains(&AdapterCall::CancelConnection {
        address: "C0:FF:EE:00:00:01".into()
    }));

    h.link.handle_event(LinkEvent::Disconnected { reason: None });
    assert_eq!(h.link.state(), LinkState::Idle);
    assert!(h.link.session().is_none());
    assert!(h.link.send_command(0x01, &[]).is_err());
}

#[test]
fn reconnect_runs_initialization_again() {
    let mut h = harness();
    bring_up(&mut h.link);
    h.link.handle_event(LinkEvent::Disconnected {
        reason: Some("out of range".into()),
    });
    bring_up(&mut h.link);
    assert_eq!(h.observer.ready_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn periodic_ticks_resend_the_command() -> anyhow::Result<()> {
    let mut h = harness();
    bring_up(&mut h.link);
    h.log.clear();

    let status = h
        .link
        .start_periodic(OutboundCommand::new(0x48, vec![]), Duration::from_millis(10))?;
    assert!(status.is_active());

    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(2), h.inbox.recv())
            .await?
            .expect("inbox open");
        assert_eq!(event, LinkEvent::PeriodicTick { generation: 1 });
        h.link.handle_event(event);
    }
    assert_eq!(h.log.writes().len(), 2);
    assert!(h.log.writes().iter().all(|w| w[0] == 0x48));

    h.link.stop_periodic();
    assert!(!status.is_active());
    assert!(!h.link.periodic_active());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_periodic_ticks_are_ignored() -> anyhow::Result<()> {
    let mut h = harness();
    bring_up(&mut h.link);

    let first = h
        .link
        .start_periodic(OutboundCommand::new(0x48, vec![]), Duration::from_secs(60))?;
    let second = h
        .link
        .start_periodic(OutboundCommand::new(0x49, vec![]), Duration::from_secs(60))?;
    assert!(!first.is_active());
    assert!(second.is_active());

    h.log.clear();
    h.link.handle_event(LinkEvent::PeriodicTick { generation: 1 });
    assert!(h.log.writes().is_empty());
    h.link.handle_event(LinkEvent::PeriodicTick { generation: 2 });
    assert_eq!(h.log.writes()[0][0], 0x49);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn periodic_requires_a_ready_link() -> anyhow::Result<()> {
    let mut h = harness();
    let err = h
        .link
        .start_periodic(OutboundCommand::new(0x48, vec![]), Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(err, LinkError::NotReady { .. }));
    Ok(())
}

/// Adapter that checks the periodic report is already stopped when the
/// connection is cancelled.
struct OrderCheckingAdapter {
    inner: RecordingAdapter,
    status: Arc<Mutex<Option<PeriodicStatus>>>,
    active_at_cancel: Arc<Mutex<Option<bool>>>,
}

impl TransportAdapter for OrderCheckingAdapter {
    fn start_scan(&mut self) -> anyhow::Result<()> {
        self.inner.start_scan()
    }
    fn stop_scan(&mut self) -> anyhow::Result<()> {
        self.inner.stop_scan()
    }
    fn connect(&mut self, device: &DeviceHandle) -> anyhow::Result<()> {
        self.inner.connect(device)
    }
    fn cancel_connection(&mut self, device: &DeviceHandle) -> anyhow::Result<()> {
        let active = self.status.lock().unwrap().as_ref().map(|s| s.is_active());
        *self.active_at_cancel.lock().unwrap() = active;
        self.inner.cancel_connection(device)
    }
    fn discover_services(&mut self, services: &[Uuid]) -> anyhow::Result<()> {
        self.inner.discover_services(services)
    }
    fn discover_characteristics(
        &mut self,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> anyhow::Result<()> {
        self.inner.discover_characteristics(service, characteristics)
    }
    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> anyhow::Result<()> {
        self.inner.set_notify(characteristic, enabled)
    }
    fn read(&mut self, characteristic: Uuid) -> anyhow::Result<()> {
        self.inner.read(characteristic)
    }
    fn write(&mut self, characteristic: Uuid, data: &[u8], kind: WriteKind) -> anyhow::Result<()> {
        self.inner.write(characteristic, data, kind)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn periodic_report_stops_before_connection_is_cancelled() -> anyhow::Result<()> {
    let (inner, _log) = RecordingAdapter::new();
    let status = Arc::new(Mutex::new(None));
    let active_at_cancel = Arc::new(Mutex::new(None));
    let adapter = OrderCheckingAdapter {
        inner,
        status: status.clone(),
        active_at_cancel: active_at_cancel.clone(),
    };
    let (handle, _inbox) = transport::channel();
    let mut link = LinkStateMachine::new(
        LinkConfig::default(),
        Box::new(adapter),
        Box::new(Recorder::default()),
        handle,
    );
    bring_up(&mut link);

    let report = link.start_periodic(OutboundCommand::new(0x48, vec![]), Duration::from_millis(5))?;
    *status.lock().unwrap() = Some(report.clone());

    link.disconnect();
    assert_eq!(*active_at_cancel.lock().unwrap(), Some(false));
    assert!(!report.is_active());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn drive_applies_posted_events_until_shutdown() -> anyhow::Result<()> {
    let (adapter, log) = RecordingAdapter::new();
    let (handle, inbox) = transport::channel();
    let observer = Recorder::default();
    let link = LinkStateMachine::new(
        LinkConfig::default(),
        Box::new(adapter),
        Box::new(observer.clone()),
        handle.clone(),
    )
    .with_bonded(ring());
    let link = Arc::new(tokio::sync::Mutex::new(link));
    let driver = tokio::spawn(ringsync::drive(link.clone(), inbox));

    handle.post(LinkEvent::AdapterState { powered_on: true });
    handle.post(LinkEvent::Connected);
    handle.post(LinkEvent::ServicesDiscovered(REQUIRED_SERVICES.to_vec()));
    handle.post(command_channels());
    handle.shutdown();
    driver.await?;

    assert!(link.lock().await.is_ready());
    assert_eq!(observer.ready_count(), 1);
    assert!(!log.calls().is_empty());
    Ok(())
}

#[test]
fn cancelled_connect_reported_as_failure_returns_to_idle() {
    let mut h = harness();
    h.link.connect(ring()).unwrap();
    h.link.disconnect();
    assert_eq!(h.link.state(), LinkState::Disconnecting);
    assert!(h.log.calls().contains(&AdapterCall::CancelConnection {
        address: "C0:FF:EE:00:00:01".into()
    }));

    h.link.handle_event(LinkEvent::ConnectFailed {
        reason: "cancelled".into(),
    });
    assert_eq!(h.link.state(), LinkState::Idle);
    assert!(!h.link.is_connected());
    assert!(h.observer.seen().is_empty());

    h.link.connect(ring()).unwrap();
    assert_eq!(h.link.state(), LinkState::Connecting);
}
