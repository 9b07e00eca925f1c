//! Room relay for rally sessions: pairs two peers under a short code and
//! forwards their negotiation frames.

pub mod app;
pub mod assist;
pub mod config;
pub mod hub;
pub mod signaling;

pub use app::{AppState, router};
pub use config::{RelayConfig, TurnConfig};
pub use hub::{ROOM_CAPACITY, RelayHub};
