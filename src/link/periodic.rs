use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::LinkError;
use crate::protocol::OutboundCommand;
use crate::transport::{LinkEvent, LinkHandle};

/// Observable flag for a running periodic report.
#[derive(Debug, Clone)]
pub struct PeriodicStatus(Arc<AtomicBool>);

impl PeriodicStatus {
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A ticker that asks the link to resend a command at a fixed interval,
/// e.g. live step counting.
pub(crate) struct PeriodicReport {
    pub(crate) generation: u64,
    pub(crate) command: OutboundCommand,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PeriodicReport {
    pub(crate) fn spawn(
        inbox: LinkHandle,
        generation: u64,
        command: OutboundCommand,
        every: Duration,
    ) -> Result<Self, LinkError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| LinkError::NoRuntime)?;
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();

        let task = runtime.spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                if !inbox.post(LinkEvent::PeriodicTick { generation }) {
                    break;
                }
            }
        });

        Ok(Self {
            generation,
            command,
            active,
            task,
        })
    }

    pub(crate) fn status(&self) -> PeriodicStatus {
        PeriodicStatus(self.active.clone())
    }

    /// Stop ticking. Takes effect before this returns.
    pub(crate) fn halt(self) {
        self.active.store(false, Ordering::SeqCst);
        self.task.abort();
        debug!("Periodic report {} halted", self.generation);
    }
}
