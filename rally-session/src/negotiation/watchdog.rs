use crate::event::{Epoch, EventSender, SessionEvent};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Single pending timeout for one connection record.
///
/// Arming again replaces the previous timer. Each arming gets its own id, so
/// a firing that raced with a re-arm can be told apart from the live one.
#[derive(Debug)]
pub struct ConnectionWatchdog {
    epoch: Epoch,
    timeout: Duration,
    events: EventSender,
    next_arm: u64,
    pending: Option<(u64, JoinHandle<()>)>,
}

impl ConnectionWatchdog {
    pub(crate) fn new(epoch: Epoch, timeout: Duration, events: EventSender) -> Self {
        Self {
            epoch,
            timeout,
            events,
            next_arm: 0,
            pending: None,
        }
    }

    pub fn arm(&mut self) -> u64 {
        self.disarm();
        self.next_arm += 1;
        let arm = self.next_arm;
        let epoch = self.epoch;
        let timeout = self.timeout;
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(SessionEvent::WatchdogFired { epoch, arm });
        });
        self.pending = Some((arm, handle));
        debug!("Watchdog {} armed ({}) for {:?}", epoch, arm, timeout);
        arm
    }

    pub fn disarm(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Accepts a firing if it belongs to the live arming. A stale id leaves
    /// the current timer untouched.
    pub fn claim(&mut self, arm: u64) -> bool {
        match &self.pending {
            Some((live, _)) if *live == arm => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for ConnectionWatchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
