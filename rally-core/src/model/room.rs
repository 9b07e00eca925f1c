use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const ROOM_CODE_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("room code must be {ROOM_CODE_LEN} letters or digits, got {0:?}")]
pub struct InvalidRoomCode(pub String);

/// Short human-typable room name. Lookups are case-insensitive, so the code is
/// kept uppercased.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    pub fn parse(raw: &str) -> Result<Self, InvalidRoomCode> {
        let trimmed = raw.trim();
        let valid = trimmed.len() == ROOM_CODE_LEN
            && trimmed.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(InvalidRoomCode(raw.to_owned()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Mints a random four digit code.
    pub fn generate() -> Self {
        let n: u32 = rand::thread_rng().gen_range(0..10_000);
        Self(format!("{n:04}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomCode {
    type Error = InvalidRoomCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
