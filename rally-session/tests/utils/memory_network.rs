use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use rally_core::{IceServerConfig, PeerId};
use rally_session::transport::{
    ChannelState, IceState, PeerTransport, SdpKind, TransportEvent, TransportEventSink,
    TransportFactory,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct Endpoint {
    sink: TransportEventSink,
    partner: Option<u64>,
    channel_open: bool,
    candidates_received: usize,
}

#[derive(Default)]
struct NetworkState {
    next_id: u64,
    endpoints: HashMap<u64, Endpoint>,
    held: bool,
    deferred: Vec<(u64, u64)>,
    offers: usize,
    /// Sinks of closed transports, still wired to their session loop.
    retired: Vec<TransportEventSink>,
}

impl NetworkState {
    /// Brings ICE up on both ends and opens the channel where it is not open
    /// yet. Either end may already be gone.
    fn complete(&mut self, a: u64, b: u64) {
        for id in [a, b] {
            if let Some(endpoint) = self.endpoints.get_mut(&id) {
                endpoint
                    .sink
                    .emit(TransportEvent::IceStateChanged(IceState::Connected));
                if !endpoint.channel_open {
                    endpoint.channel_open = true;
                    endpoint
                        .sink
                        .emit(TransportEvent::ChannelStateChanged(ChannelState::Open));
                }
            }
        }
    }
}

/// In-process stand-in for the WebRTC stack. Transports created through its
/// factories find each other through the tokens embedded in their mock SDP.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        Arc::new(MemoryTransportFactory {
            network: self.clone(),
        })
    }

    /// Answers still flow, but connectivity is not reported until
    /// [`release`](Self::release).
    pub fn hold(&self) {
        self.state.lock().unwrap().held = true;
    }

    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.held = false;
        for (a, b) in std::mem::take(&mut state.deferred) {
            state.complete(a, b);
        }
    }

    /// Reports ICE failure on every live transport.
    pub fn fail_ice(&self) {
        let state = self.state.lock().unwrap();
        for endpoint in state.endpoints.values() {
            endpoint
                .sink
                .emit(TransportEvent::IceStateChanged(IceState::Failed));
        }
    }

    /// Reports the data channel closed on every live transport.
    pub fn close_channels(&self) {
        let state = self.state.lock().unwrap();
        for endpoint in state.endpoints.values() {
            endpoint
                .sink
                .emit(TransportEvent::ChannelStateChanged(ChannelState::Closed));
        }
    }

    /// Replays `event` through the sinks of transports that were already
    /// closed, as a late callback from a torn-down connection would.
    pub fn emit_on_retired(&self, event: TransportEvent) -> usize {
        let state = self.state.lock().unwrap();
        state
            .retired
            .iter()
            .filter(|sink| sink.emit(event.clone()))
            .count()
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().unwrap().offers
    }

    pub fn live_transports(&self) -> usize {
        self.state.lock().unwrap().endpoints.len()
    }

    pub fn candidates_received(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .endpoints
            .values()
            .map(|e| e.candidates_received)
            .sum()
    }

    fn register(&self, sink: TransportEventSink) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.endpoints.insert(
            id,
            Endpoint {
                sink,
                partner: None,
                channel_open: false,
                candidates_received: 0,
            },
        );
        id
    }
}

struct MemoryTransportFactory {
    network: MemoryNetwork,
}

#[async_trait]
impl TransportFactory for MemoryTransportFactory {
    async fn create(
        &self,
        _remote: &PeerId,
        _ice_servers: Vec<IceServerConfig>,
        events: TransportEventSink,
    ) -> Result<Box<dyn PeerTransport>> {
        let id = self.network.register(events);
        Ok(Box::new(MemoryTransport {
            id,
            network: self.network.clone(),
        }))
    }
}

struct MemoryTransport {
    id: u64,
    network: MemoryNetwork,
}

fn token(sdp: &str, prefix: &str) -> Result<u64> {
    sdp.strip_prefix(prefix)
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| anyhow!("unparseable mock sdp {sdp:?}"))
}

impl MemoryTransport {
    fn emit_local_candidate(&self) {
        let state = self.network.state.lock().unwrap();
        if let Some(endpoint) = state.endpoints.get(&self.id) {
            endpoint.sink.emit(TransportEvent::LocalCandidate(json!({
                "candidate": format!("candidate:mock {}", self.id),
                "sdpMid": "0",
                "sdpMLineIndex": 0,
            })));
        }
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn open_data_channel(&self, _label: &str) -> Result<()> {
        Ok(())
    }

    async fn create_offer(&self, _ice_restart: bool) -> Result<String> {
        self.network.state.lock().unwrap().offers += 1;
        self.emit_local_candidate();
        Ok(format!("mock-offer:{}", self.id))
    }

    async fn create_answer(&self) -> Result<String> {
        self.emit_local_candidate();
        Ok(format!("mock-answer:{}", self.id))
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        let mut state = self.network.state.lock().unwrap();
        match kind {
            SdpKind::Offer => {
                let offerer = token(&sdp, "mock-offer:")?;
                if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
                    endpoint.partner = Some(offerer);
                }
            }
            SdpKind::Answer => {
                let answerer = token(&sdp, "mock-answer:")?;
                if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
                    endpoint.partner = Some(answerer);
                }
                if state.held {
                    state.deferred.push((self.id, answerer));
                } else {
                    state.complete(self.id, answerer);
                }
            }
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: Value) -> Result<()> {
        let mut state = self.network.state.lock().unwrap();
        if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
            endpoint.candidates_received += 1;
        }
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let state = self.network.state.lock().unwrap();
        let Some(partner) = state
            .endpoints
            .get(&self.id)
            .and_then(|e| e.partner)
            .and_then(|p| state.endpoints.get(&p))
        else {
            bail!("no partner for transport {}", self.id);
        };
        partner.sink.emit(TransportEvent::Message(Bytes::from(text)));
        Ok(())
    }

    /// Leaves the partner untouched; it learns about the loss from the relay.
    async fn close(&self) -> Result<()> {
        let mut state = self.network.state.lock().unwrap();
        if let Some(endpoint) = state.endpoints.remove(&self.id) {
            state.retired.push(endpoint.sink);
        }
        Ok(())
    }
}
