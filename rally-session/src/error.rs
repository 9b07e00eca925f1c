use rally_core::{CodecError, InvalidRoomCode, RoomCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    InvalidRoomCode(#[from] InvalidRoomCode),

    #[error("no free room code found after {attempts} attempts")]
    RoomTaken { attempts: u32 },

    #[error("room {0} does not exist")]
    RoomNotFound(RoomCode),

    #[error("room {0} is full")]
    RoomFull(RoomCode),

    #[error("already in room {0}")]
    AlreadyInRoom(RoomCode),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("relay link closed")]
    LinkClosed,

    #[error("data channel is not open")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("session has shut down")]
    SessionClosed,
}

impl SessionError {
    /// A short, actionable hint for the player.
    pub fn next_step(&self) -> &'static str {
        match self {
            Self::InvalidRoomCode(_) => "Check the code: it is four letters or digits.",
            Self::RoomTaken { .. } => "Try hosting again in a moment.",
            Self::RoomNotFound(_) => "Ask the host for a fresh code.",
            Self::RoomFull(_) => "This room already has two players.",
            Self::AlreadyInRoom(_) => "Leave the current room first.",
            Self::Relay(_) | Self::LinkClosed => "Check your connection and reconnect.",
            Self::NotConnected | Self::Transport(_) => "Wait for the connection to come back.",
            Self::Codec(_) => "This looks like a bug; please report it.",
            Self::SessionClosed => "Restart the game.",
        }
    }
}
