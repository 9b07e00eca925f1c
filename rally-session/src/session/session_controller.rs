use crate::assist::{HttpIceServers, IceServerSource, StaticIceServers};
use crate::config::SessionConfig;
use crate::credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use crate::error::SessionError;
use crate::event::{Epoch, EpochCounter, EventSender, SessionEvent};
use crate::negotiation::{
    ConnectionRecord, NegotiationState, NegotiatorSettings, PeerNegotiator, Step,
};
use crate::session::session_command::{Reply, SessionCommand};
use crate::session::{GameBridge, SessionHandle, SessionMode, SessionSnapshot, SessionStatus};
use crate::signaling::{RelayConnector, SignalSink, SignalingLink, WsRelayConnector};
use crate::transport::{TransportFactory, WebRtcTransportFactory};
use bytes::Bytes;
use rally_core::{
    GameMessage, HostCredential, IceServerConfig, PeerId, RelayErrorCode, RoomCode,
    SignalMessage, decode_data, encode_data,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Interval;
use tracing::{debug, error, info, warn};

/// The pluggable edges of a session.
#[derive(Clone)]
pub struct SessionServices {
    pub relay: Arc<dyn RelayConnector>,
    pub transports: Arc<dyn TransportFactory>,
    pub ice: Arc<dyn IceServerSource>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl SessionServices {
    /// WebSocket relay, webrtc-rs transport, ICE servers from the relay's
    /// assist endpoint and credentials on disk when a path is configured.
    pub fn from_config(config: &SessionConfig) -> Self {
        let ice: Arc<dyn IceServerSource> = match config.assist_base() {
            Some(base) => Arc::new(HttpIceServers::new(base, IceServerConfig::default_stun())),
            None => Arc::new(StaticIceServers::default()),
        };
        let credentials: Arc<dyn CredentialStore> = match &config.credentials_path {
            Some(path) => Arc::new(FileCredentialStore::new(path.clone())),
            None => Arc::new(MemoryCredentialStore::default()),
        };
        Self {
            relay: Arc::new(WsRelayConnector::new(config.relay_url.clone())),
            transports: Arc::new(WebRtcTransportFactory),
            ice,
            credentials,
        }
    }
}

/// How the pending relay request is phrased.
#[derive(Debug)]
enum EntryKind {
    Create {
        credential: HostCredential,
        attempts: u32,
    },
    Join,
    /// Join presenting the stored credential; re-create the room if the relay
    /// has already dropped it.
    ReconnectHost {
        credential: HostCredential,
        recreating: bool,
    },
}

impl EntryKind {
    fn request(&self, room: &RoomCode) -> SignalMessage {
        match self {
            Self::Create { credential, .. }
            | Self::ReconnectHost {
                credential,
                recreating: true,
            } => SignalMessage::Create {
                room: room.clone(),
                credential: credential.clone(),
            },
            Self::Join => SignalMessage::Join {
                room: room.clone(),
                credential: None,
            },
            Self::ReconnectHost { credential, .. } => SignalMessage::Join {
                room: room.clone(),
                credential: Some(credential.clone()),
            },
        }
    }

    fn credential(&self) -> Option<&HostCredential> {
        match self {
            Self::Create { credential, .. } | Self::ReconnectHost { credential, .. } => {
                Some(credential)
            }
            Self::Join => None,
        }
    }
}

#[derive(Debug)]
enum EntryReply {
    Host(Reply<RoomCode>),
    Join(Reply<()>),
    ReconnectHost(Reply<SessionMode>),
}

impl EntryReply {
    fn succeed(self, room: RoomCode, mode: SessionMode) {
        match self {
            Self::Host(reply) => {
                let _ = reply.send(Ok(room));
            }
            Self::Join(reply) => {
                let _ = reply.send(Ok(()));
            }
            Self::ReconnectHost(reply) => {
                let _ = reply.send(Ok(mode));
            }
        }
    }

    fn fail(self, err: SessionError) {
        match self {
            Self::Host(reply) => {
                let _ = reply.send(Err(err));
            }
            Self::Join(reply) => {
                let _ = reply.send(Err(err));
            }
            Self::ReconnectHost(reply) => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// A create/join sent to the relay and not yet answered.
#[derive(Debug)]
struct PendingEntry {
    room: RoomCode,
    kind: EntryKind,
    reply: EntryReply,
}

/// Single-consumer event loop owning one session: the relay link, the
/// pending entry request and at most one negotiator.
///
/// Commands, relay frames, transport callbacks and timer firings are all
/// handled here one at a time, so none of them need locking.
pub struct SessionController {
    config: SessionConfig,
    services: SessionServices,
    bridge: Arc<dyn GameBridge>,
    commands: mpsc::Receiver<SessionCommand>,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    epochs: EpochCounter,
    mode: SessionMode,
    status: SessionStatus,
    room: Option<RoomCode>,
    link: Option<SignalingLink>,
    pending: Option<PendingEntry>,
    negotiator: Option<PeerNegotiator>,
    /// Newest continuous message waiting for the next tick.
    queued_state: Option<GameMessage>,
    peer_ready: bool,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        services: SessionServices,
        bridge: Arc<dyn GameBridge>,
    ) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(config.command_buffer);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let controller = Self {
            config,
            services,
            bridge,
            commands,
            events_tx,
            events_rx,
            snapshots,
            epochs: EpochCounter::default(),
            mode: SessionMode::Offline,
            status: SessionStatus::Offline,
            room: None,
            link: None,
            pending: None,
            negotiator: None,
            queued_state: None,
            peer_ready: false,
        };
        (controller, SessionHandle::new(command_tx, snapshot_rx))
    }

    /// Spawns the loop on the current runtime.
    pub fn spawn(
        config: SessionConfig,
        services: SessionServices,
        bridge: Arc<dyn GameBridge>,
    ) -> SessionHandle {
        let (controller, handle) = Self::new(config, services, bridge);
        tokio::spawn(controller.run());
        handle
    }

    pub async fn run(mut self) {
        info!("Session loop started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!("All session handles dropped, shutting down");
                            break;
                        }
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                }

                _ = next_tick(self.negotiator.as_mut().and_then(PeerNegotiator::ticker_mut)) => {
                    self.handle_tick().await;
                }
            }
        }

        self.leave().await;
        info!("Session loop finished");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Host { reply } => {
                if let Some(room) = self.active_room() {
                    let _ = reply.send(Err(SessionError::AlreadyInRoom(room)));
                    return;
                }
                let kind = EntryKind::Create {
                    credential: HostCredential::generate(),
                    attempts: 1,
                };
                self.open_entry(RoomCode::generate(), kind, EntryReply::Host(reply))
                    .await;
            }
            SessionCommand::Join { room, reply } => {
                if let Some(current) = self.active_room() {
                    let _ = reply.send(Err(SessionError::AlreadyInRoom(current)));
                    return;
                }
                self.open_entry(room, EntryKind::Join, EntryReply::Join(reply))
                    .await;
            }
            SessionCommand::ReconnectHost { room, reply } => {
                let kind = match self.services.credentials.load(&room) {
                    Some(credential) => EntryKind::ReconnectHost {
                        credential,
                        recreating: false,
                    },
                    None => {
                        warn!("No stored host credential for {}, rejoining as client", room);
                        EntryKind::Join
                    }
                };
                self.open_entry(room, kind, EntryReply::ReconnectHost(reply))
                    .await;
            }
            SessionCommand::ReconnectClient { room, reply } => {
                self.open_entry(room, EntryKind::Join, EntryReply::Join(reply))
                    .await;
            }
            SessionCommand::Send { message, reply } => {
                let _ = reply.send(self.submit(message).await);
            }
            SessionCommand::Leave { reply } => {
                self.leave().await;
                let _ = reply.send(());
            }
        }
    }

    fn active_room(&self) -> Option<RoomCode> {
        self.pending
            .as_ref()
            .map(|p| p.room.clone())
            .or_else(|| self.room.clone())
    }

    /// Sends the entry request. While the relay link from an earlier entry is
    /// still up, the room is left and re-entered on that link; otherwise a
    /// fresh link is opened under a new identity.
    async fn open_entry(&mut self, room: RoomCode, kind: EntryKind, reply: EntryReply) {
        if self.room.is_some() && self.link.is_some() {
            self.teardown_negotiator().await;
            if let Some(pending) = self.pending.take() {
                pending.reply.fail(SessionError::LinkClosed);
            }
            let left = self
                .link
                .as_ref()
                .map(|link| link.send_signal(SignalMessage::Leave));
            match left {
                Some(Ok(())) => {
                    info!("Re-entering room {} on the live relay link", room);
                    self.set_status(SessionStatus::Connecting);
                    self.resend_entry(PendingEntry { room, kind, reply });
                    return;
                }
                Some(Err(e)) => debug!("Relay link refused leave ({}), reconnecting", e),
                None => {}
            }
        }

        self.reset().await;
        self.set_status(SessionStatus::Connecting);

        let epoch = self.epochs.advance();
        let request = kind.request(&room);
        let connected = SignalingLink::connect(
            self.services.relay.as_ref(),
            epoch,
            PeerId::new(),
            request,
            self.config.keepalive_interval,
            self.events_tx.clone(),
        )
        .await;

        match connected {
            Ok(link) => {
                self.link = Some(link);
                self.pending = Some(PendingEntry { room, kind, reply });
                self.publish();
            }
            Err(e) => {
                error!("Could not reach relay: {}", e);
                self.fall_back(e.to_string());
                reply.fail(e);
            }
        }
    }

    /// Drops the link, any pending entry and the negotiator. Mode and room
    /// code are kept.
    async fn reset(&mut self) {
        self.teardown_negotiator().await;
        if let Some(pending) = self.pending.take() {
            pending.reply.fail(SessionError::LinkClosed);
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    async fn teardown_negotiator(&mut self) {
        if let Some(mut negotiator) = self.negotiator.take() {
            negotiator.close().await;
        }
        self.queued_state = None;
        self.peer_ready = false;
    }

    /// Status after an entry attempt failed: back to offline for a first
    /// attempt, reconnectable when a room was already established.
    fn fall_back(&mut self, reason: String) {
        if self.room.is_some() {
            self.set_status(SessionStatus::Reconnectable { reason });
        } else {
            self.mode = SessionMode::Offline;
            self.set_status(SessionStatus::Offline);
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Relay { link, message } => {
                if !self.is_current_link(link) {
                    debug!("Dropping frame from stale relay link {}", link);
                    return;
                }
                self.handle_signal(message).await;
            }
            SessionEvent::RelayClosed { link } => {
                if !self.is_current_link(link) {
                    debug!("Stale relay link {} closed", link);
                    return;
                }
                self.on_link_lost().await;
            }
            SessionEvent::Transport { epoch, event } => {
                let step = match self.current_negotiation(epoch) {
                    Some((negotiator, link)) => negotiator.on_transport_event(event, link).await,
                    None => {
                        debug!("Dropping transport event for stale record {}", epoch);
                        return;
                    }
                };
                self.apply_step(step).await;
            }
            SessionEvent::WatchdogFired { epoch, arm } => {
                let step = match self.current_negotiation(epoch) {
                    Some((negotiator, link)) => negotiator.on_watchdog(arm, link).await,
                    None => return,
                };
                self.apply_step(step).await;
            }
        }
    }

    fn is_current_link(&self, epoch: Epoch) -> bool {
        self.link.as_ref().is_some_and(|l| l.epoch() == epoch)
    }

    fn current_negotiation(
        &mut self,
        epoch: Epoch,
    ) -> Option<(&mut PeerNegotiator, &SignalingLink)> {
        let negotiator = self
            .negotiator
            .as_mut()
            .filter(|n| n.record().epoch == epoch)?;
        let link = self.link.as_ref()?;
        Some((negotiator, link))
    }

    fn negotiation_with(
        &mut self,
        remote: &PeerId,
    ) -> Option<(&mut PeerNegotiator, &SignalingLink)> {
        let negotiator = self
            .negotiator
            .as_mut()
            .filter(|n| &n.record().remote == remote)?;
        let link = self.link.as_ref()?;
        Some((negotiator, link))
    }

    fn addressed_to_me(&self, to: &PeerId) -> bool {
        self.link.as_ref().is_some_and(|l| l.local_id() == to)
    }

    async fn handle_signal(&mut self, message: SignalMessage) {
        match message {
            SignalMessage::Welcome {
                room,
                peer,
                peers,
                host,
            } => self.on_welcome(room, peer, peers, host).await,
            SignalMessage::Error { code, message } => self.on_relay_error(code, message),
            SignalMessage::PeerJoined { peer } => {
                if self.pending.is_some() {
                    warn!("Peer {} joined before we were admitted", peer);
                    return;
                }
                self.start_negotiation(peer).await;
            }
            SignalMessage::PeerLeft { peer } => self.on_peer_left(peer).await,
            SignalMessage::Offer { from, to, sdp } => {
                if !self.addressed_to_me(&to) {
                    return;
                }
                if self.pending.is_some() {
                    debug!("Offer from {} arrived before we were admitted", from);
                    return;
                }
                if self.negotiator.is_none() {
                    self.start_negotiation(from.clone()).await;
                }
                let step = match self.negotiation_with(&from) {
                    Some((negotiator, link)) => negotiator.on_offer(sdp, link).await,
                    None => {
                        warn!("Offer from unknown peer {}", from);
                        return;
                    }
                };
                self.apply_step(step).await;
            }
            SignalMessage::Answer { from, to, sdp } => {
                if !self.addressed_to_me(&to) {
                    return;
                }
                let step = match self.negotiation_with(&from) {
                    Some((negotiator, link)) => negotiator.on_answer(sdp, link).await,
                    None => {
                        warn!("Answer from unknown peer {}", from);
                        return;
                    }
                };
                self.apply_step(step).await;
            }
            SignalMessage::Ice {
                from,
                to,
                candidate,
            } => {
                if !self.addressed_to_me(&to) {
                    return;
                }
                match self.negotiation_with(&from) {
                    Some((negotiator, _)) => negotiator.on_remote_candidate(candidate).await,
                    None => debug!("Candidate from unknown peer {} dropped", from),
                }
            }
            SignalMessage::RestartIce { from, to, reason } => {
                if !self.addressed_to_me(&to) {
                    return;
                }
                let step = match self.negotiation_with(&from) {
                    Some((negotiator, link)) => negotiator.on_restart_request(reason, link).await,
                    None => return,
                };
                self.apply_step(step).await;
            }
            SignalMessage::Create { .. }
            | SignalMessage::Join { .. }
            | SignalMessage::Leave
            | SignalMessage::Ping => {
                warn!("Relay sent a client-only frame, ignoring");
            }
        }
    }

    async fn on_welcome(&mut self, room: RoomCode, peer: PeerId, peers: Vec<PeerId>, host: bool) {
        let Some(pending) = self.pending.take() else {
            warn!("Unexpected welcome for room {}", room);
            return;
        };
        if pending.room != room {
            warn!("Asked for room {} but was admitted to {}", pending.room, room);
        }
        if !self.addressed_to_me(&peer) {
            warn!("Relay welcomed {} which is not our identity", peer);
        }

        let mode = match &pending.kind {
            EntryKind::Create { .. } => SessionMode::Host,
            EntryKind::ReconnectHost { .. } if host => SessionMode::Host,
            EntryKind::ReconnectHost { .. } => {
                warn!("Relay did not accept our host credential for {}, continuing as client", room);
                SessionMode::Client
            }
            EntryKind::Join => SessionMode::Client,
        };
        if mode == SessionMode::Host {
            if let Some(credential) = pending.kind.credential() {
                if let Err(e) = self.services.credentials.save(&room, credential) {
                    warn!("Could not persist host credential: {:#}", e);
                }
            }
        }

        info!("Entered room {} as {:?}", room, mode);
        self.mode = mode;
        self.room = Some(room.clone());

        if peers.len() > 1 {
            warn!("Room reports {} other peers, negotiating with the first", peers.len());
        }
        let remote = peers.into_iter().next();
        if remote.is_none() {
            self.set_status(SessionStatus::WaitingForPeer);
        } else {
            self.publish();
        }
        pending.reply.succeed(room, mode);

        if let Some(remote) = remote {
            self.start_negotiation(remote).await;
        }
    }

    fn on_relay_error(&mut self, code: String, message: Option<String>) {
        let Some(mut pending) = self.pending.take() else {
            warn!(
                "Relay error {}: {}",
                code,
                message.as_deref().unwrap_or("no detail")
            );
            return;
        };

        let parsed = RelayErrorCode::parse(&code);
        let max_attempts = self.config.max_create_attempts;
        let retry = match (parsed, &mut pending.kind) {
            (Some(RelayErrorCode::RoomExists), EntryKind::Create { credential, attempts })
                if *attempts < max_attempts =>
            {
                *attempts += 1;
                *credential = HostCredential::generate();
                true
            }
            (Some(RelayErrorCode::RoomNotFound), EntryKind::ReconnectHost { recreating, .. })
                if !*recreating =>
            {
                *recreating = true;
                true
            }
            _ => false,
        };

        if retry {
            if matches!(pending.kind, EntryKind::Create { .. }) {
                pending.room = RoomCode::generate();
                info!("Room code taken, trying {}", pending.room);
            } else {
                info!("Room {} is gone, re-creating it", pending.room);
            }
            self.resend_entry(pending);
            return;
        }

        let err = match parsed {
            Some(RelayErrorCode::RoomExists) => SessionError::RoomTaken {
                attempts: match pending.kind {
                    EntryKind::Create { attempts, .. } => attempts,
                    _ => 1,
                },
            },
            Some(RelayErrorCode::RoomNotFound) => SessionError::RoomNotFound(pending.room.clone()),
            Some(RelayErrorCode::RoomFull) => SessionError::RoomFull(pending.room.clone()),
            _ => SessionError::Relay(match message {
                Some(message) => format!("{code}: {message}"),
                None => code,
            }),
        };
        self.abandon_entry(pending, err);
    }

    fn resend_entry(&mut self, pending: PendingEntry) {
        let request = pending.kind.request(&pending.room);
        let sent = match self.link.as_ref() {
            Some(link) => link.send_signal(request),
            None => Err(SessionError::LinkClosed),
        };
        match sent {
            Ok(()) => self.pending = Some(pending),
            Err(e) => self.abandon_entry(pending, e),
        }
    }

    fn abandon_entry(&mut self, pending: PendingEntry, err: SessionError) {
        warn!("Could not enter room {}: {}", pending.room, err);
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.fall_back(err.to_string());
        pending.reply.fail(err);
    }

    async fn start_negotiation(&mut self, remote: PeerId) {
        let Some(local) = self.link.as_ref().map(|l| l.local_id().clone()) else {
            return;
        };
        if local == remote {
            warn!("Relay announced our own identity as a peer");
            return;
        }
        if let Some(existing) = self.negotiator.as_ref() {
            if existing.record().remote == remote {
                debug!("Already negotiating with {}", remote);
                return;
            }
            warn!(
                "Replacing negotiation with {} by {}",
                existing.record().remote,
                remote
            );
            self.teardown_negotiator().await;
        }

        let epoch = self.epochs.advance();
        let ice_servers = self.services.ice.ice_servers(&local).await;
        let record = ConnectionRecord::new(epoch, local, remote);
        info!(
            "Negotiating with {} as {:?} (record {})",
            record.remote, record.role, epoch
        );
        let settings = NegotiatorSettings {
            watchdog_timeout: self.config.watchdog_timeout,
            max_restarts: self.config.max_restarts,
            channel_label: self.config.channel_label.clone(),
        };
        let mut negotiator = PeerNegotiator::new(
            record,
            settings,
            self.services.transports.clone(),
            ice_servers,
            self.events_tx.clone(),
        );

        self.set_status(SessionStatus::Negotiating);
        let step = match self.link.as_ref() {
            Some(link) => negotiator.start(link).await,
            None => return,
        };
        self.negotiator = Some(negotiator);
        self.apply_step(step).await;
    }

    async fn on_peer_left(&mut self, peer: PeerId) {
        let tracked = self
            .negotiator
            .as_ref()
            .is_some_and(|n| n.record().remote == peer);
        if !tracked {
            debug!("Untracked peer {} left", peer);
            return;
        }
        info!("Peer {} left room", peer);
        self.teardown_negotiator().await;
        self.set_status(SessionStatus::WaitingForPeer);
        self.bridge.on_peer_lost().await;
    }

    async fn on_link_lost(&mut self) {
        warn!("Relay link lost");
        if let Some(negotiator) = self.negotiator.as_mut() {
            negotiator.mark_link_down();
        }
        self.teardown_negotiator().await;
        self.link = None;

        if let Some(pending) = self.pending.take() {
            pending.reply.fail(SessionError::LinkClosed);
        }
        let had_room = self.room.is_some();
        self.fall_back("relay link lost".to_owned());
        if had_room {
            self.bridge.on_peer_lost().await;
        }
    }

    async fn apply_step(&mut self, step: Step) {
        match step {
            Step::Idle => {}
            Step::ChannelOpen => self.on_channel_open().await,
            Step::Inbound(bytes) => self.on_inbound(bytes).await,
            Step::Terminal(reason) => {
                warn!("Connection failed for good: {}", reason);
                self.teardown_negotiator().await;
                self.set_status(SessionStatus::Reconnectable { reason });
                self.bridge.on_peer_lost().await;
            }
        }
        self.sync_status();
        self.publish();
    }

    /// Keeps `Connected`/`Negotiating` in line with the negotiator while a
    /// restart is in flight.
    fn sync_status(&mut self) {
        let Some(negotiator) = self.negotiator.as_ref() else {
            return;
        };
        let derived = if negotiator.record().state == NegotiationState::Open {
            SessionStatus::Connected
        } else {
            SessionStatus::Negotiating
        };
        if matches!(
            self.status,
            SessionStatus::Connected | SessionStatus::Negotiating
        ) {
            self.status = derived;
        }
    }

    async fn on_channel_open(&mut self) {
        if let Some(negotiator) = self.negotiator.as_mut() {
            info!("Data channel open with {}", negotiator.record().remote);
            negotiator.start_ticker(self.config.send_interval);
        }
        self.set_status(SessionStatus::Connected);
        self.bridge.on_channel_open(self.mode).await;

        if self.mode == SessionMode::Host {
            let descriptor = self.bridge.session_descriptor().await;
            let init = GameMessage::Init {
                track_def: descriptor.track_def,
                host_role: descriptor.host_role,
            };
            if let Err(e) = self.send_game(&init).await {
                warn!("Could not send init: {}", e);
            }
        }
    }

    async fn on_inbound(&mut self, bytes: Bytes) {
        let Ok(text) = std::str::from_utf8(&bytes) else {
            warn!("Dropping non UTF-8 data frame");
            return;
        };
        let message = match decode_data(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping invalid game message: {}", e);
                return;
            }
        };

        let reply_ready = match (&message, self.mode) {
            (GameMessage::Ready, SessionMode::Host) => {
                info!("Guest is ready");
                self.peer_ready = true;
                false
            }
            (GameMessage::Init { .. }, SessionMode::Host) => {
                warn!("Ignoring init from guest");
                return;
            }
            (GameMessage::Init { .. }, SessionMode::Client) => true,
            _ => false,
        };

        self.bridge.on_message(self.mode, message).await;

        if reply_ready {
            match self.send_game(&GameMessage::Ready).await {
                Ok(()) => self.peer_ready = true,
                Err(e) => warn!("Could not send ready: {}", e),
            }
        }
    }

    async fn handle_tick(&mut self) {
        if !self.negotiator.as_ref().is_some_and(PeerNegotiator::is_open) {
            return;
        }
        let queued = self.queued_state.take();
        let ticked = self.bridge.outbound_tick(self.mode).await;
        for message in queued.into_iter().chain(ticked) {
            if let Err(e) = self.send_game(&message).await {
                debug!("Tick send of {} failed: {}", message.kind(), e);
            }
        }
    }

    /// Discrete events go out at once. Continuous state waits for the next
    /// tick, and only the newest queued one is sent.
    async fn submit(&mut self, message: GameMessage) -> Result<(), SessionError> {
        if !message.is_continuous() {
            return self.send_game(&message).await;
        }
        if !self.negotiator.as_ref().is_some_and(PeerNegotiator::is_open) {
            debug!("Dropping {}, no open channel", message.kind());
            return Err(SessionError::NotConnected);
        }
        if let Some(replaced) = self.queued_state.replace(message) {
            debug!("Queued {} superseded", replaced.kind());
        }
        Ok(())
    }

    async fn send_game(&self, message: &GameMessage) -> Result<(), SessionError> {
        let Some(negotiator) = self.negotiator.as_ref().filter(|n| n.is_open()) else {
            debug!("Dropping outbound message, no open channel");
            return Err(SessionError::NotConnected);
        };
        let text = encode_data(message)?;
        negotiator
            .send_text(text)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Timers and transport first, then the relay link.
    async fn leave(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.reply.fail(SessionError::LinkClosed);
        }
        self.teardown_negotiator().await;
        if let Some(link) = self.link.take() {
            link.close();
        }
        if let Some(room) = self.room.take() {
            info!("Left room {}", room);
        }
        self.mode = SessionMode::Offline;
        self.set_status(SessionStatus::Offline);
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.publish();
    }

    fn publish(&self) {
        let negotiator = self.negotiator.as_ref().map(PeerNegotiator::record);
        self.snapshots.send_replace(SessionSnapshot {
            mode: self.mode,
            status: self.status.clone(),
            room: self.room.clone(),
            local_peer: self.link.as_ref().map(|l| l.local_id().clone()),
            remote_peer: negotiator.map(|r| r.remote.clone()),
            ice: negotiator.map(|r| r.ice),
            channel: negotiator.map(|r| r.channel),
            restarts: negotiator.map_or(0, |r| r.restarts),
            peer_ready: self.peer_ready,
        });
    }
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
