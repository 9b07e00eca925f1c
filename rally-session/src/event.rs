use crate::transport::TransportEvent;
use rally_core::SignalMessage;
use std::fmt;
use tokio::sync::mpsc;

/// Generation number stamped on every relay link and connection record.
/// Callbacks carry the epoch they were created under; anything that no
/// longer matches the live object is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch(u64);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-controller epoch source.
#[derive(Debug, Default)]
pub(crate) struct EpochCounter(u64);

impl EpochCounter {
    pub fn advance(&mut self) -> Epoch {
        self.0 += 1;
        Epoch(self.0)
    }
}

/// Everything the session loop reacts to, in arrival order.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Relay { link: Epoch, message: SignalMessage },
    RelayClosed { link: Epoch },
    Transport { epoch: Epoch, event: TransportEvent },
    WatchdogFired { epoch: Epoch, arm: u64 },
}

pub(crate) type EventSender = mpsc::UnboundedSender<SessionEvent>;
