use crate::transport::{
    ChannelState, IceState, PeerTransport, SdpKind, TransportEvent, TransportEventSink,
    TransportFactory,
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use rally_core::{IceServerConfig, PeerId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

type SharedChannel = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// webrtc-rs backed transport.
pub struct WebRtcTransport {
    remote: PeerId,
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: SharedChannel,
    events: TransportEventSink,
}

impl WebRtcTransport {
    pub async fn new(
        remote: PeerId,
        ice_servers: Vec<IceServerConfig>,
        events: TransportEventSink,
    ) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .into_iter()
                .map(|server| RTCIceServer {
                    urls: server.urls,
                    username: server.username.unwrap_or_default(),
                    credential: server.credential.unwrap_or_default(),
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);
        let data_channel: SharedChannel = Arc::new(Mutex::new(None));

        let ice_events = events.clone();
        let ice_remote = remote.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                let events = ice_events.clone();
                let remote = ice_remote.clone();

                Box::pin(async move {
                    info!("ICE state with {} changed: {:?}", remote, s);
                    if let Some(state) = map_ice_state(s) {
                        events.emit(TransportEvent::IceStateChanged(state));
                    }
                })
            },
        ));

        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();

            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let Ok(value) = serde_json::to_value(&init) else {
                    return;
                };
                events.emit(TransportEvent::LocalCandidate(value));
            })
        }));

        // The answerer never creates a channel; it adopts the offerer's.
        let dc_events = events.clone();
        let dc_slot = data_channel.clone();
        peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = dc_events.clone();
            let slot = dc_slot.clone();

            Box::pin(async move {
                debug!("Remote opened data channel '{}'", dc.label());
                wire_channel(&dc, events);
                *slot.lock().await = Some(dc);
            })
        }));

        Ok(Self {
            remote,
            peer_connection,
            data_channel,
            events,
        })
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceState> {
    match state {
        RTCIceConnectionState::New => Some(IceState::New),
        RTCIceConnectionState::Checking => Some(IceState::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(IceState::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(IceState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceState::Failed),
        RTCIceConnectionState::Closed => Some(IceState::Closed),
        _ => None,
    }
}

fn wire_channel(dc: &Arc<RTCDataChannel>, events: TransportEventSink) {
    let open_events = events.clone();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            open_events.emit(TransportEvent::ChannelStateChanged(ChannelState::Open));
        })
    }));

    let close_events = events.clone();
    dc.on_close(Box::new(move || {
        let events = close_events.clone();
        Box::pin(async move {
            events.emit(TransportEvent::ChannelStateChanged(ChannelState::Closed));
        })
    }));

    let error_events = events.clone();
    dc.on_error(Box::new(move |err: webrtc::Error| {
        let events = error_events.clone();
        Box::pin(async move {
            warn!("Data channel error: {}", err);
            events.emit(TransportEvent::ChannelStateChanged(ChannelState::Error));
        })
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        Box::pin(async move {
            let bytes = Bytes::from(msg.data.to_vec());
            events.emit(TransportEvent::Message(bytes));
        })
    }));
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn open_data_channel(&self, label: &str) -> Result<()> {
        let dc = self.peer_connection.create_data_channel(label, None).await?;
        wire_channel(&dc, self.events.clone());
        *self.data_channel.lock().await = Some(dc);
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        let options = ice_restart.then_some(RTCOfferOptions {
            voice_activity_detection: false,
            ice_restart: true,
        });
        let offer = self.peer_connection.create_offer(options).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;
        Ok(answer.sdp)
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        let desc = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp)?,
            SdpKind::Answer => RTCSessionDescription::answer(sdp)?,
        };
        self.peer_connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Value) -> Result<()> {
        let init: RTCIceCandidateInit =
            serde_json::from_value(candidate).context("Failed to parse ICE candidate JSON")?;
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let guard = self.data_channel.lock().await;
        let dc = guard
            .as_ref()
            .ok_or_else(|| anyhow!("no data channel to {}", self.remote))?;
        dc.send_text(text).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(dc) = self.data_channel.lock().await.take() {
            dc.close().await?;
        }
        self.peer_connection.close().await?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcTransportFactory;

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        remote: &PeerId,
        ice_servers: Vec<IceServerConfig>,
        events: TransportEventSink,
    ) -> Result<Box<dyn PeerTransport>> {
        let transport = WebRtcTransport::new(remote.clone(), ice_servers, events).await?;
        Ok(Box::new(transport))
    }
}
