use crate::event::{Epoch, EventSender, SessionEvent};
use bytes::Bytes;
use serde_json::Value;

/// ICE connectivity as reported by the transport. `Completed` is folded into
/// `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    IceStateChanged(IceState),
    ChannelStateChanged(ChannelState),
    /// Locally gathered candidate, already in its JSON init form.
    LocalCandidate(Value),
    Message(Bytes),
}

/// Handed to a transport at creation. Every event it emits is stamped with
/// the epoch of the record that owns the transport.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    epoch: Epoch,
    tx: EventSender,
}

impl TransportEventSink {
    pub(crate) fn new(epoch: Epoch, tx: EventSender) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Returns `false` once the session loop is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent::Transport {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}
