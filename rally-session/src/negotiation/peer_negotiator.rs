use crate::error::SessionError;
use crate::event::EventSender;
use crate::negotiation::{
    ConnectionRecord, ConnectionWatchdog, NegotiationInput, NegotiationState,
};
use crate::signaling::SignalSink;
use crate::transport::{
    ChannelState, IceState, PeerTransport, SdpKind, TransportEvent, TransportEventSink,
    TransportFactory,
};
use anyhow::{Result, bail};
use bytes::Bytes;
use rally_core::{IceServerConfig, NegotiationRole, SignalMessage};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct NegotiatorSettings {
    pub watchdog_timeout: Duration,
    pub max_restarts: u32,
    pub channel_label: String,
}

/// What the session loop has to do after the negotiator handled an input.
#[derive(Debug, PartialEq)]
pub enum Step {
    Idle,
    ChannelOpen,
    Inbound(Bytes),
    /// Negotiation gave up. The record is failed and the transport should be
    /// torn down.
    Terminal(String),
}

/// Drives offer/answer, trickle ICE and restarts for one remote peer.
///
/// Owns the [`ConnectionRecord`], the transport, the watchdog and the
/// outbound ticker, so tearing the negotiator down releases all of them.
pub struct PeerNegotiator {
    record: ConnectionRecord,
    settings: NegotiatorSettings,
    factory: Arc<dyn TransportFactory>,
    ice_servers: Vec<IceServerConfig>,
    sink: TransportEventSink,
    transport: Option<Box<dyn PeerTransport>>,
    watchdog: ConnectionWatchdog,
    ticker: Option<Interval>,
}

impl PeerNegotiator {
    pub(crate) fn new(
        record: ConnectionRecord,
        settings: NegotiatorSettings,
        factory: Arc<dyn TransportFactory>,
        ice_servers: Vec<IceServerConfig>,
        events: EventSender,
    ) -> Self {
        let sink = TransportEventSink::new(record.epoch, events.clone());
        let watchdog = ConnectionWatchdog::new(record.epoch, settings.watchdog_timeout, events);
        Self {
            record,
            settings,
            factory,
            ice_servers,
            sink,
            transport: None,
            watchdog,
            ticker: None,
        }
    }

    pub fn record(&self) -> &ConnectionRecord {
        &self.record
    }

    pub fn is_open(&self) -> bool {
        self.record.channel == ChannelState::Open && !self.record.state.is_terminal()
    }

    pub fn watchdog_armed(&self) -> bool {
        self.watchdog.is_armed()
    }

    fn apply(&mut self, input: NegotiationInput) {
        let from = self.record.state;
        if self.record.apply(input) {
            debug!(
                "Negotiation with {}: {:?} --{:?}--> {:?}",
                self.record.remote, from, input, self.record.state
            );
        } else {
            debug!(
                "Negotiation with {}: {:?} ignored in {:?}",
                self.record.remote, input, from
            );
        }
    }

    pub async fn start(&mut self, link: &dyn SignalSink) -> Step {
        self.apply(NegotiationInput::Start);
        match self.record.role {
            NegotiationRole::Offerer => {
                info!("Offering to {}", self.record.remote);
                if let Err(e) = self.send_offer(link, false).await {
                    error!("Initial offer to {} failed: {:#}", self.record.remote, e);
                    return self.fail(format!("offer failed: {e}"), link).await;
                }
            }
            NegotiationRole::Answerer => {
                info!("Waiting for offer from {}", self.record.remote);
                self.watchdog.arm();
            }
        }
        Step::Idle
    }

    async fn ensure_transport(&mut self) -> Result<bool> {
        if self.transport.is_some() {
            return Ok(false);
        }
        let transport = self
            .factory
            .create(
                &self.record.remote,
                self.ice_servers.clone(),
                self.sink.clone(),
            )
            .await?;
        self.transport = Some(transport);
        Ok(true)
    }

    async fn send_offer(&mut self, link: &dyn SignalSink, ice_restart: bool) -> Result<()> {
        self.watchdog.arm();
        let fresh = self.ensure_transport().await?;
        let Some(transport) = self.transport.as_ref() else {
            bail!("transport missing after creation");
        };
        if fresh {
            transport.open_data_channel(&self.settings.channel_label).await?;
        }
        let sdp = transport.create_offer(ice_restart && !fresh).await?;
        let offer = SignalMessage::Offer {
            from: self.record.local.clone(),
            to: self.record.remote.clone(),
            sdp,
        };
        self.signal(link, offer)?;
        Ok(())
    }

    pub async fn on_offer(&mut self, sdp: String, link: &dyn SignalSink) -> Step {
        if self.record.role != NegotiationRole::Answerer || self.record.state.is_terminal() {
            warn!(
                "Ignoring offer from {} in {:?} as {:?}",
                self.record.remote, self.record.state, self.record.role
            );
            return Step::Idle;
        }
        match self.accept_offer(sdp, link).await {
            Ok(()) => Step::Idle,
            Err(e) => {
                error!("Answering {} failed: {:#}", self.record.remote, e);
                self.fail(format!("answer failed: {e}"), link).await
            }
        }
    }

    async fn accept_offer(&mut self, sdp: String, link: &dyn SignalSink) -> Result<()> {
        self.ensure_transport().await?;
        let Some(transport) = self.transport.as_ref() else {
            bail!("transport missing after creation");
        };
        transport.set_remote_description(SdpKind::Offer, sdp).await?;
        self.record.remote_description = true;
        self.flush_candidates().await;

        let Some(transport) = self.transport.as_ref() else {
            bail!("transport missing after creation");
        };
        let sdp = transport.create_answer().await?;
        let answer = SignalMessage::Answer {
            from: self.record.local.clone(),
            to: self.record.remote.clone(),
            sdp,
        };
        self.signal(link, answer)?;
        self.apply(NegotiationInput::OfferApplied);
        self.settle();
        Ok(())
    }

    pub async fn on_answer(&mut self, sdp: String, link: &dyn SignalSink) -> Step {
        if self.record.role != NegotiationRole::Offerer
            || self.record.state != NegotiationState::AwaitingAnswer
        {
            warn!(
                "Ignoring answer from {} in {:?} as {:?}",
                self.record.remote, self.record.state, self.record.role
            );
            return Step::Idle;
        }
        let Some(transport) = self.transport.as_ref() else {
            return Step::Idle;
        };
        if let Err(e) = transport.set_remote_description(SdpKind::Answer, sdp).await {
            error!("Applying answer from {} failed: {:#}", self.record.remote, e);
            return self.fail(format!("bad answer: {e}"), link).await;
        }
        self.record.remote_description = true;
        self.flush_candidates().await;
        self.apply(NegotiationInput::AnswerApplied);
        self.settle();
        Step::Idle
    }

    /// After a description is applied: either connectivity is already back
    /// (restart while the channel stayed open) or we wait under the watchdog.
    fn settle(&mut self) {
        if self.record.is_healthy() {
            self.apply(NegotiationInput::Recovered);
            self.watchdog.disarm();
        } else {
            self.watchdog.arm();
        }
    }

    /// Candidates that arrive before the remote description are buffered and
    /// applied in arrival order once it is set.
    pub async fn on_remote_candidate(&mut self, candidate: Value) {
        if self.record.state.is_terminal() {
            return;
        }
        match self.transport.as_ref() {
            Some(transport) if self.record.remote_description => {
                if let Err(e) = transport.add_ice_candidate(candidate).await {
                    warn!("Rejected candidate from {}: {:#}", self.record.remote, e);
                }
            }
            _ => {
                debug!("Buffering candidate from {}", self.record.remote);
                self.record.pending_candidates.push(candidate);
            }
        }
    }

    async fn flush_candidates(&mut self) {
        let pending = std::mem::take(&mut self.record.pending_candidates);
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        if !pending.is_empty() {
            debug!(
                "Applying {} buffered candidates from {}",
                pending.len(),
                self.record.remote
            );
        }
        for candidate in pending {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                warn!("Rejected candidate from {}: {:#}", self.record.remote, e);
            }
        }
    }

    pub async fn on_restart_request(
        &mut self,
        reason: Option<String>,
        link: &dyn SignalSink,
    ) -> Step {
        if self.record.role != NegotiationRole::Offerer {
            warn!("Ignoring restart request from {}", self.record.remote);
            return Step::Idle;
        }
        if self.record.state == NegotiationState::AwaitingAnswer {
            debug!("Restart with {} already in flight", self.record.remote);
            return Step::Idle;
        }
        let reason = reason.unwrap_or_else(|| "requested by peer".to_owned());
        self.fail(format!("peer asked for restart: {reason}"), link)
            .await
    }

    pub async fn on_transport_event(&mut self, event: TransportEvent, link: &dyn SignalSink) -> Step {
        if self.record.state == NegotiationState::Closed {
            return Step::Idle;
        }
        match event {
            TransportEvent::IceStateChanged(state) => {
                self.record.ice = state;
                match state {
                    IceState::Failed => self.fail("ICE failed".to_owned(), link).await,
                    IceState::Connected if self.record.is_healthy() => {
                        self.apply(NegotiationInput::Recovered);
                        self.watchdog.disarm();
                        Step::Idle
                    }
                    _ => Step::Idle,
                }
            }
            TransportEvent::ChannelStateChanged(state) => {
                self.record.channel = state;
                match state {
                    ChannelState::Open => {
                        self.apply(NegotiationInput::ChannelOpened);
                        self.watchdog.disarm();
                        Step::ChannelOpen
                    }
                    ChannelState::Closed | ChannelState::Error => {
                        self.watchdog.disarm();
                        self.ticker = None;
                        self.apply(NegotiationInput::ChannelLost);
                        Step::Terminal(format!("data channel {state:?}").to_lowercase())
                    }
                    ChannelState::Connecting => Step::Idle,
                }
            }
            TransportEvent::LocalCandidate(candidate) => {
                let message = SignalMessage::Ice {
                    from: self.record.local.clone(),
                    to: self.record.remote.clone(),
                    candidate,
                };
                if let Err(e) = self.signal(link, message) {
                    warn!("Could not send candidate: {}", e);
                }
                Step::Idle
            }
            TransportEvent::Message(bytes) => Step::Inbound(bytes),
        }
    }

    pub async fn on_watchdog(&mut self, arm: u64, link: &dyn SignalSink) -> Step {
        if !self.watchdog.claim(arm) {
            debug!("Stale watchdog firing {} ignored", arm);
            return Step::Idle;
        }
        if self.record.state == NegotiationState::Open {
            return Step::Idle;
        }
        warn!(
            "Negotiation with {} timed out in {:?}",
            self.record.remote, self.record.state
        );
        self.fail("negotiation timed out".to_owned(), link).await
    }

    /// Sends over the relay, remembering when the link turns out to be gone.
    fn signal(&mut self, link: &dyn SignalSink, message: SignalMessage) -> Result<(), SessionError> {
        let sent = link.send_signal(message);
        if matches!(sent, Err(SessionError::LinkClosed)) && self.record.link_up {
            warn!("Relay link to {} is down", self.record.remote);
            self.mark_link_down();
        }
        sent
    }

    /// Restart if budget remains and the relay can still carry the new
    /// offer, otherwise give up.
    async fn fail(&mut self, reason: String, link: &dyn SignalSink) -> Step {
        if self.record.state.is_terminal() {
            return Step::Idle;
        }
        if !self.record.link_up {
            warn!(
                "Cannot restart with {} without a relay link: {}",
                self.record.remote, reason
            );
            return self.give_up(format!("{reason}, relay link down"));
        }
        if self.record.restarts >= self.settings.max_restarts {
            warn!(
                "Giving up on {} after {} restarts: {}",
                self.record.remote, self.record.restarts, reason
            );
            return self.give_up(reason);
        }

        self.record.restarts += 1;
        info!(
            "Restarting negotiation with {} ({}/{}): {}",
            self.record.remote, self.record.restarts, self.settings.max_restarts, reason
        );
        self.apply(NegotiationInput::Restart);
        match self.record.role {
            NegotiationRole::Offerer => {
                if let Err(e) = self.send_offer(link, true).await {
                    // The watchdog stays armed; its firing counts as the next failure.
                    error!("Restart offer to {} failed: {:#}", self.record.remote, e);
                }
            }
            NegotiationRole::Answerer => {
                self.watchdog.arm();
                let message = SignalMessage::RestartIce {
                    from: self.record.local.clone(),
                    to: self.record.remote.clone(),
                    reason: Some(reason),
                };
                if let Err(e) = self.signal(link, message) {
                    warn!("Could not request restart: {}", e);
                }
            }
        }
        Step::Idle
    }

    fn give_up(&mut self, reason: String) -> Step {
        self.watchdog.disarm();
        self.ticker = None;
        self.apply(NegotiationInput::Exhausted);
        Step::Terminal(reason)
    }

    /// Sends a text frame over the open data channel.
    pub async fn send_text(&self, text: String) -> Result<()> {
        match self.transport.as_ref() {
            Some(transport) if self.is_open() => transport.send_text(text).await,
            _ => bail!("data channel to {} is not open", self.record.remote),
        }
    }

    /// First tick lands one `period` after the channel opened.
    pub fn start_ticker(&mut self, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
    }

    pub fn ticker_mut(&mut self) -> Option<&mut Interval> {
        self.ticker.as_mut()
    }

    pub fn mark_link_down(&mut self) {
        self.record.link_up = false;
    }

    /// Timers first, then the transport.
    pub async fn close(&mut self) {
        self.watchdog.disarm();
        self.ticker = None;
        self.apply(NegotiationInput::Close);
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Closing transport to {} failed: {:#}", self.record.remote, e);
            }
        }
    }
}
