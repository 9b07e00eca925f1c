mod relay_connector;
mod signaling_link;

pub use relay_connector::{RelayChannel, RelayConnector, WsRelayConnector};
pub use signaling_link::{SignalSink, SignalingLink};
