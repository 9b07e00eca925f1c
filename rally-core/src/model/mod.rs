mod credential;
mod ice;
mod peer;
mod role;
mod room;

pub use credential::HostCredential;
pub use ice::{DEFAULT_STUN_ADDR, DEFAULT_STUN_ADDR_2, IceServerConfig, IceServersResponse};
pub use peer::{NegotiationRole, PeerId, elect_role};
pub use role::HostRole;
pub use room::{InvalidRoomCode, ROOM_CODE_LEN, RoomCode};
