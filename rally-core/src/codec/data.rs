use crate::codec::{CodecError, decode_tagged};
use crate::model::HostRole;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Messages carried on the data channel once it is open. Payload internals
/// (car state, input, projectiles) belong to the simulation and are only
/// shape-checked here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GameMessage {
    /// Guest has consumed `init` and is in-game.
    Ready,

    #[serde(rename_all = "camelCase")]
    Init {
        track_def: String,
        host_role: HostRole,
    },

    #[serde(rename_all = "camelCase")]
    Track { track_def: String },

    /// Host snapshot. Fields other than `t` and `car` change as the game
    /// evolves, so they are kept as-is in `extra`.
    State {
        t: f64,
        car: Map<String, Value>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    #[serde(rename_all = "camelCase")]
    Nav {
        aim_x: f64,
        aim_y: f64,
        shoot_held: bool,
        weapon_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bullet_time_held: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        damage_events: Option<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        projectiles: Option<Vec<Value>>,
    },

    #[serde(rename_all = "camelCase")]
    Driver {
        input: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bullet_time_held: Option<bool>,
    },
}

impl GameMessage {
    pub const KINDS: &'static [&'static str] =
        &["ready", "init", "track", "state", "nav", "driver"];

    pub fn kind(&self) -> &'static str {
        match self {
            GameMessage::Ready => "ready",
            GameMessage::Init { .. } => "init",
            GameMessage::Track { .. } => "track",
            GameMessage::State { .. } => "state",
            GameMessage::Nav { .. } => "nav",
            GameMessage::Driver { .. } => "driver",
        }
    }

    /// Continuous messages are sent on the fixed cadence; everything else is a
    /// discrete event.
    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            GameMessage::State { .. } | GameMessage::Nav { .. } | GameMessage::Driver { .. }
        )
    }
}

pub fn decode_data(raw: &str) -> Result<GameMessage, CodecError> {
    decode_tagged(raw, GameMessage::KINDS)
}

pub fn encode_data(message: &GameMessage) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::Encode)
}
