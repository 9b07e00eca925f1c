use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one relay link. A fresh id is minted every time a link opens.
#[derive(Debug, Serialize, Deserialize, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which half of the offer/answer exchange a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

/// Offerer election: the lexicographically lower identity offers.
///
/// Both peers evaluate this on their own and reach the same split without a
/// negotiation round.
pub fn elect_role(local: &PeerId, remote: &PeerId) -> NegotiationRole {
    if local < remote {
        NegotiationRole::Offerer
    } else {
        NegotiationRole::Answerer
    }
}
