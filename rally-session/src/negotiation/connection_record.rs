use crate::event::Epoch;
use crate::transport::{ChannelState, IceState};
use rally_core::{NegotiationRole, PeerId, elect_role};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AwaitingOffer,
    AwaitingAnswer,
    Connecting,
    Open,
    Failed,
    Closed,
}

/// Discrete inputs that move a record between [`NegotiationState`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationInput {
    Start,
    OfferApplied,
    AnswerApplied,
    ChannelOpened,
    /// Connectivity came back after a restart while the channel stayed open.
    Recovered,
    Restart,
    ChannelLost,
    Exhausted,
    Close,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// The transition table. `None` means the input is illegal in this state
    /// and must be ignored.
    pub fn next(self, role: NegotiationRole, input: NegotiationInput) -> Option<Self> {
        use NegotiationInput as I;
        use NegotiationRole::{Answerer, Offerer};
        use NegotiationState as S;

        match (self, role, input) {
            (_, _, I::Close) => Some(S::Closed),
            (S::Closed, _, _) => None,
            (S::Idle, Offerer, I::Start) => Some(S::AwaitingAnswer),
            (S::Idle, Answerer, I::Start) => Some(S::AwaitingOffer),
            (S::Idle | S::AwaitingOffer | S::Connecting | S::Open, Answerer, I::OfferApplied) => {
                Some(S::Connecting)
            }
            (S::AwaitingAnswer, Offerer, I::AnswerApplied) => Some(S::Connecting),
            (S::AwaitingOffer | S::AwaitingAnswer | S::Connecting, _, I::ChannelOpened) => {
                Some(S::Open)
            }
            (S::AwaitingOffer | S::AwaitingAnswer | S::Connecting, _, I::Recovered) => {
                Some(S::Open)
            }
            (S::Failed, _, _) => None,
            (_, Offerer, I::Restart) => Some(S::AwaitingAnswer),
            (_, Answerer, I::Restart) => Some(S::AwaitingOffer),
            (_, _, I::ChannelLost | I::Exhausted) => Some(S::Failed),
            _ => None,
        }
    }
}

/// Everything known about the one remote peer of a session. Replaced
/// wholesale whenever negotiation starts over with a new identity.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub epoch: Epoch,
    pub local: PeerId,
    pub remote: PeerId,
    pub role: NegotiationRole,
    pub state: NegotiationState,
    pub link_up: bool,
    pub ice: IceState,
    pub channel: ChannelState,
    pub restarts: u32,
    pub remote_description: bool,
    pub pending_candidates: Vec<Value>,
}

impl ConnectionRecord {
    pub fn new(epoch: Epoch, local: PeerId, remote: PeerId) -> Self {
        let role = elect_role(&local, &remote);
        Self {
            epoch,
            local,
            remote,
            role,
            state: NegotiationState::Idle,
            link_up: true,
            ice: IceState::New,
            channel: ChannelState::Connecting,
            restarts: 0,
            remote_description: false,
            pending_candidates: Vec::new(),
        }
    }

    /// Applies `input` if the table allows it. Returns whether the state
    /// changed.
    pub fn apply(&mut self, input: NegotiationInput) -> bool {
        match self.state.next(self.role, input) {
            Some(next) => {
                self.state = next;
                true
            }
            None => false,
        }
    }

    /// Both halves of a healthy connection are up.
    pub fn is_healthy(&self) -> bool {
        self.ice == IceState::Connected && self.channel == ChannelState::Open
    }
}
