use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::link::DeviceHandle;
use crate::transport::{TransportAdapter, WriteKind};

/// A request recorded by [`RecordingAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    StartScan,
    StopScan,
    Connect { address: String },
    CancelConnection { address: String },
    DiscoverServices(Vec<Uuid>),
    DiscoverCharacteristics { service: Uuid, characteristics: Vec<Uuid> },
    SetNotify { characteristic: Uuid, enabled: bool },
    Read(Uuid),
    Write { characteristic: Uuid, data: Vec<u8>, kind: WriteKind },
}

/// Shared view of everything a [`RecordingAdapter`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct AdapterLog {
    calls: Arc<Mutex<Vec<AdapterCall>>>,
    fail_writes: Arc<AtomicBool>,
    fail_connect: Arc<AtomicBool>,
}

impl AdapterLog {
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Frames written to any characteristic, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                AdapterCall::Write { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: AdapterCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

/// Transport adapter that records requests instead of touching a radio.
///
/// Completions are not simulated; tests post the matching `LinkEvent`s
/// themselves.
#[derive(Debug, Default)]
pub struct RecordingAdapter {
    log: AdapterLog,
}

impl RecordingAdapter {
    pub fn new() -> (Self, AdapterLog) {
        let log = AdapterLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl TransportAdapter for RecordingAdapter {
    fn start_scan(&mut self) -> anyhow::Result<()> {
        self.log.record(AdapterCall::StartScan);
        Ok(())
    }

    fn stop_scan(&mut self) -> anyhow::Result<()> {
        self.log.record(AdapterCall::StopScan);
        Ok(())
    }

    fn connect(&mut self, device: &DeviceHandle) -> anyhow::Result<()> {
        self.log.record(AdapterCall::Connect {
            address: device.address.clone(),
        });
        if self.log.fail_connect.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("connect refused by adapter"));
        }
        Ok(())
    }

    fn cancel_connection(&mut self, device: &DeviceHandle) -> anyhow::Result<()> {
        self.log.record(AdapterCall::CancelConnection {
            address: device.address.clone(),
        });
        Ok(())
    }

    fn discover_services(&mut self, services: &[Uuid]) -> anyhow::Result<()> {
        self.log.record(AdapterCall::DiscoverServices(services.to_vec()));
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> anyhow::Result<()> {
        self.log.record(AdapterCall::DiscoverCharacteristics {
            service,
            characteristics: characteristics.to_vec(),
        });
        Ok(())
    }

    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> anyhow::Result<()> {
        self.log.record(AdapterCall::SetNotify {
            characteristic,
            enabled,
        });
        Ok(())
    }

    fn read(&mut self, characteristic: Uuid) -> anyhow::Result<()> {
        self.log.record(AdapterCall::Read(characteristic));
        Ok(())
    }

    fn write(&mut self, characteristic: Uuid, data: &[u8], kind: WriteKind) -> anyhow::Result<()> {
        self.log.record(AdapterCall::Write {
            characteristic,
            data: data.to_vec(),
            kind,
        });
        if self.log.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("write rejected by adapter"));
        }
        Ok(())
    }
}
