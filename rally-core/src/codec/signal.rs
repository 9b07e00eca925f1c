use crate::codec::{CodecError, decode_tagged};
use crate::model::{HostCredential, PeerId, RoomCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Relay-side failure reasons carried by `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorCode {
    RoomExists,
    RoomNotFound,
    RoomFull,
    BadRequest,
    NotInRoom,
}

impl RelayErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayErrorCode::RoomExists => "room-exists",
            RelayErrorCode::RoomNotFound => "room-not-found",
            RelayErrorCode::RoomFull => "room-full",
            RelayErrorCode::BadRequest => "bad-request",
            RelayErrorCode::NotInRoom => "not-in-room",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "room-exists" => Some(RelayErrorCode::RoomExists),
            "room-not-found" => Some(RelayErrorCode::RoomNotFound),
            "room-full" => Some(RelayErrorCode::RoomFull),
            "bad-request" => Some(RelayErrorCode::BadRequest),
            "not-in-room" => Some(RelayErrorCode::NotInRoom),
            _ => None,
        }
    }
}

/// Frames exchanged with the relay. Negotiation payloads (`sdp`, `candidate`)
/// are carried without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    Create {
        room: RoomCode,
        credential: HostCredential,
    },
    Join {
        room: RoomCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<HostCredential>,
    },
    /// Vacates the current room while keeping the link open.
    Leave,
    Ping,
    Welcome {
        room: RoomCode,
        peer: PeerId,
        peers: Vec<PeerId>,
        #[serde(default)]
        host: bool,
    },
    PeerJoined {
        peer: PeerId,
    },
    PeerLeft {
        peer: PeerId,
    },
    Offer {
        from: PeerId,
        to: PeerId,
        sdp: String,
    },
    Answer {
        from: PeerId,
        to: PeerId,
        sdp: String,
    },
    Ice {
        from: PeerId,
        to: PeerId,
        candidate: Value,
    },
    RestartIce {
        from: PeerId,
        to: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl SignalMessage {
    pub const KINDS: &'static [&'static str] = &[
        "create",
        "join",
        "leave",
        "ping",
        "welcome",
        "peer-joined",
        "peer-left",
        "offer",
        "answer",
        "ice",
        "restart-ice",
        "error",
    ];

    pub fn error(code: RelayErrorCode, message: impl Into<String>) -> Self {
        SignalMessage::Error {
            code: code.as_str().to_owned(),
            message: Some(message.into()),
        }
    }

    /// Sender and recipient of a peer-addressed frame.
    pub fn route(&self) -> Option<(&PeerId, &PeerId)> {
        match self {
            SignalMessage::Offer { from, to, .. }
            | SignalMessage::Answer { from, to, .. }
            | SignalMessage::Ice { from, to, .. }
            | SignalMessage::RestartIce { from, to, .. } => Some((from, to)),
            _ => None,
        }
    }

    /// Copy of a peer-addressed frame with `from` replaced.
    pub fn with_sender(self, sender: PeerId) -> Self {
        match self {
            SignalMessage::Offer { to, sdp, .. } => SignalMessage::Offer {
                from: sender,
                to,
                sdp,
            },
            SignalMessage::Answer { to, sdp, .. } => SignalMessage::Answer {
                from: sender,
                to,
                sdp,
            },
            SignalMessage::Ice { to, candidate, .. } => SignalMessage::Ice {
                from: sender,
                to,
                candidate,
            },
            SignalMessage::RestartIce { to, reason, .. } => SignalMessage::RestartIce {
                from: sender,
                to,
                reason,
            },
            other => other,
        }
    }
}

pub fn decode_signal(raw: &str) -> Result<SignalMessage, CodecError> {
    decode_tagged(raw, SignalMessage::KINDS)
}

pub fn encode_signal(message: &SignalMessage) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::Encode)
}
