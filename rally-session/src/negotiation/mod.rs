mod connection_record;
mod peer_negotiator;
mod watchdog;

pub use connection_record::{ConnectionRecord, NegotiationInput, NegotiationState};
pub use peer_negotiator::{NegotiatorSettings, PeerNegotiator, Step};
pub use watchdog::ConnectionWatchdog;
