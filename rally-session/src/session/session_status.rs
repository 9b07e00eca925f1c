use crate::transport::{ChannelState, IceState};
use rally_core::{PeerId, RoomCode};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Offline,
    Host,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Offline,
    Connecting,
    WaitingForPeer,
    Negotiating,
    Connected,
    /// Automatic recovery is exhausted or the relay is gone. The room code is
    /// kept so the player can reconnect.
    Reconnectable { reason: String },
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("Offline. Host a room or join one with a code."),
            Self::Connecting => f.write_str("Contacting the relay..."),
            Self::WaitingForPeer => {
                f.write_str("Waiting for the other player. Share the room code.")
            }
            Self::Negotiating => f.write_str("Connecting to the other player..."),
            Self::Connected => f.write_str("Connected."),
            Self::Reconnectable { reason } => {
                write!(f, "Connection lost ({reason}). Reconnect to continue.")
            }
        }
    }
}

/// Read-only view published after every state change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub room: Option<RoomCode>,
    pub local_peer: Option<PeerId>,
    pub remote_peer: Option<PeerId>,
    pub ice: Option<IceState>,
    pub channel: Option<ChannelState>,
    pub restarts: u32,
    pub peer_ready: bool,
}
