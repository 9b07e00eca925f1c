//! Peer-to-peer session layer for a two-player rally game: relay signaling,
//! WebRTC negotiation with bounded ICE restarts, and the session loop that
//! ties them to the game.

pub mod assist;
pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod negotiation;
pub mod session;
pub mod signaling;
pub mod transport;

pub use assist::{HttpIceServers, IceServerSource, StaticIceServers, check_health};
pub use config::SessionConfig;
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::SessionError;
pub use event::Epoch;
pub use session::{
    GameBridge, SessionController, SessionDescriptor, SessionHandle, SessionMode,
    SessionServices, SessionSnapshot, SessionStatus,
};
