use crate::session::SessionMode;
use async_trait::async_trait;
use rally_core::{GameMessage, HostRole};

/// What the host announces in `init`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescriptor {
    pub track_def: String,
    pub host_role: HostRole,
}

/// The game side of a session. The controller never interprets game state;
/// it only moves [`GameMessage`]s between this bridge and the data channel.
#[async_trait]
pub trait GameBridge: Send + Sync {
    /// Track and role the host sends when the channel opens.
    async fn session_descriptor(&self) -> SessionDescriptor;

    async fn on_channel_open(&self, _mode: SessionMode) {}

    async fn on_message(&self, mode: SessionMode, message: GameMessage);

    /// Polled once per send interval while the channel is open.
    async fn outbound_tick(&self, _mode: SessionMode) -> Option<GameMessage> {
        None
    }

    async fn on_peer_lost(&self) {}
}
