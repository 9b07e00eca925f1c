use serde::{Deserialize, Serialize};

/// Seat the host occupies in the shared car. The guest takes the other one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    Driver,
    Navigator,
}

impl HostRole {
    pub fn guest(self) -> Self {
        match self {
            HostRole::Driver => HostRole::Navigator,
            HostRole::Navigator => HostRole::Driver,
        }
    }
}
