use crate::transport::{SdpKind, TransportEventSink};
use anyhow::Result;
use async_trait::async_trait;
use rally_core::{IceServerConfig, PeerId};
use serde_json::Value;

/// One peer connection plus its single data channel.
///
/// Implementations report everything asynchronous (ICE progress, channel
/// state, gathered candidates, inbound frames) through the
/// [`TransportEventSink`] they were created with.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates the outgoing data channel. Only the offerer calls this; the
    /// answerer receives the channel from the remote side.
    async fn open_data_channel(&self, label: &str) -> Result<()>;

    /// Creates an offer and applies it locally. Returns the SDP.
    async fn create_offer(&self, ice_restart: bool) -> Result<String>;

    /// Creates an answer to the applied remote offer and applies it locally.
    async fn create_answer(&self) -> Result<String>;

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: Value) -> Result<()>;

    async fn send_text(&self, text: String) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        remote: &PeerId,
        ice_servers: Vec<IceServerConfig>,
        events: TransportEventSink,
    ) -> Result<Box<dyn PeerTransport>>;
}
