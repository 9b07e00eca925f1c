use crate::hub::relay_room::RelayRoom;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rally_core::{
    HostCredential, PeerId, RelayErrorCode, RoomCode, SignalMessage, decode_signal, encode_signal,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Identifies one attachment of a peer, so a late cleanup from a replaced
/// socket cannot remove its successor.
pub type LinkId = u64;

struct PeerSlot {
    link: LinkId,
    tx: mpsc::UnboundedSender<String>,
    room: Option<RoomCode>,
}

struct HubInner {
    peers: DashMap<PeerId, PeerSlot>,
    rooms: DashMap<RoomCode, RelayRoom>,
    next_link: AtomicU64,
}

/// Room registry and frame router. Transport-agnostic: each attached peer is
/// just an outbound text channel, so the same hub backs WebSocket clients and
/// in-process ones.
#[derive(Clone)]
pub struct RelayHub {
    inner: Arc<HubInner>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                peers: DashMap::new(),
                rooms: DashMap::new(),
                next_link: AtomicU64::new(1),
            }),
        }
    }

    /// Registers an outbound channel for `peer_id`. Pass the returned id to
    /// [`detach`](Self::detach) when the link ends.
    pub fn attach(&self, peer_id: PeerId, tx: mpsc::UnboundedSender<String>) -> LinkId {
        let link = self.inner.next_link.fetch_add(1, Ordering::Relaxed);
        let previous = self.inner.peers.insert(
            peer_id.clone(),
            PeerSlot {
                link,
                tx,
                room: None,
            },
        );
        if let Some(previous) = previous {
            warn!("Peer {} re-attached, dropping previous link", peer_id);
            if let Some(room) = previous.room {
                self.vacate(&peer_id, room);
            }
        }
        link
    }

    /// Drops the peer's link and tells whoever shared its room. Does nothing
    /// if the peer has since re-attached under a newer link.
    pub fn detach(&self, peer_id: &PeerId, link: LinkId) {
        let Some((_, slot)) = self.inner.peers.remove_if(peer_id, |_, s| s.link == link) else {
            debug!("Link {} of {} already replaced", link, peer_id);
            return;
        };
        if let Some(room) = slot.room {
            self.vacate(peer_id, room);
        }
    }

    /// Takes the peer out of its room but keeps the link, so a create or join
    /// sent afterwards on the same link is handled in order.
    fn leave_room(&self, peer_id: &PeerId) {
        let room = match self.inner.peers.get_mut(peer_id) {
            Some(mut slot) => slot.room.take(),
            None => None,
        };
        match room {
            Some(room) => {
                info!("Peer {} left room {}", peer_id, room);
                self.vacate(peer_id, room);
            }
            None => debug!("Peer {} asked to leave but is in no room", peer_id),
        }
    }

    fn vacate(&self, peer_id: &PeerId, room: RoomCode) {
        let remaining = match self.inner.rooms.get_mut(&room) {
            Some(mut entry) => entry.evict(peer_id),
            None => Vec::new(),
        };
        if remaining.is_empty() {
            self.inner.rooms.remove_if(&room, |_, r| r.is_empty());
            info!("Room {} closed", room);
        }

        for other in remaining {
            self.send(
                &other,
                &SignalMessage::PeerLeft {
                    peer: peer_id.clone(),
                },
            );
        }
    }

    pub fn handle_text(&self, peer_id: &PeerId, text: &str) {
        let msg = match decode_signal(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Invalid frame from {}: {}", peer_id, e);
                self.send(
                    peer_id,
                    &SignalMessage::error(RelayErrorCode::BadRequest, e.to_string()),
                );
                return;
            }
        };

        match msg {
            SignalMessage::Create { room, credential } => self.create_room(peer_id, room, credential),
            SignalMessage::Join { room, credential } => self.join_room(peer_id, room, credential),
            SignalMessage::Leave => self.leave_room(peer_id),
            SignalMessage::Ping => debug!("Keepalive from {}", peer_id),
            routed @ (SignalMessage::Offer { .. }
            | SignalMessage::Answer { .. }
            | SignalMessage::Ice { .. }
            | SignalMessage::RestartIce { .. }) => self.forward(peer_id, routed),
            other => {
                warn!("Peer {} sent relay-only frame {:?}", peer_id, other);
                self.send(
                    peer_id,
                    &SignalMessage::error(RelayErrorCode::BadRequest, "frame is relay-only"),
                );
            }
        }
    }

    fn current_room(&self, peer_id: &PeerId) -> Option<RoomCode> {
        self.inner.peers.get(peer_id).and_then(|s| s.room.clone())
    }

    fn set_room(&self, peer_id: &PeerId, room: RoomCode) {
        if let Some(mut slot) = self.inner.peers.get_mut(peer_id) {
            slot.room = Some(room);
        }
    }

    fn create_room(&self, peer_id: &PeerId, room: RoomCode, credential: HostCredential) {
        if self.current_room(peer_id).is_some() {
            self.send(
                peer_id,
                &SignalMessage::error(RelayErrorCode::BadRequest, "already in a room"),
            );
            return;
        }

        match self.inner.rooms.entry(room.clone()) {
            Entry::Occupied(_) => {
                info!("Peer {} tried to create taken room {}", peer_id, room);
                self.send(
                    peer_id,
                    &SignalMessage::error(RelayErrorCode::RoomExists, "room code is taken"),
                );
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(RelayRoom::new(peer_id.clone(), credential));
            }
        }

        info!("Peer {} created room {}", peer_id, room);
        self.set_room(peer_id, room.clone());
        self.send(
            peer_id,
            &SignalMessage::Welcome {
                room,
                peer: peer_id.clone(),
                peers: Vec::new(),
                host: true,
            },
        );
    }

    fn join_room(&self, peer_id: &PeerId, room: RoomCode, credential: Option<HostCredential>) {
        if self.current_room(peer_id).is_some() {
            self.send(
                peer_id,
                &SignalMessage::error(RelayErrorCode::BadRequest, "already in a room"),
            );
            return;
        }

        let admitted = match self.inner.rooms.get_mut(&room) {
            None => Err(RelayErrorCode::RoomNotFound),
            Some(entry) if entry.is_full() => Err(RelayErrorCode::RoomFull),
            Some(mut entry) => {
                let host = entry.grants_host(credential.as_ref());
                if credential.is_some() && !host {
                    warn!("Peer {} presented a host credential for {} that was not accepted", peer_id, room);
                }
                Ok((entry.admit(peer_id.clone(), host), host))
            }
        };

        let (others, host) = match admitted {
            Ok(v) => v,
            Err(code) => {
                info!("Peer {} could not join {}: {}", peer_id, room, code.as_str());
                self.send(peer_id, &SignalMessage::error(code, format!("cannot join {room}")));
                return;
            }
        };

        info!("Peer {} joined room {} (host: {})", peer_id, room, host);
        self.set_room(peer_id, room.clone());
        self.send(
            peer_id,
            &SignalMessage::Welcome {
                room,
                peer: peer_id.clone(),
                peers: others.clone(),
                host,
            },
        );
        for other in others {
            self.send(
                &other,
                &SignalMessage::PeerJoined {
                    peer: peer_id.clone(),
                },
            );
        }
    }

    fn forward(&self, peer_id: &PeerId, msg: SignalMessage) {
        let Some((_, to)) = msg.route() else {
            return;
        };
        let to = to.clone();

        let same_room = match self.current_room(peer_id) {
            Some(room) => self
                .inner
                .rooms
                .get(&room)
                .is_some_and(|r| r.contains(&to) && r.contains(peer_id)),
            None => false,
        };
        if !same_room {
            warn!("Dropping frame from {} to {}: not in the same room", peer_id, to);
            self.send(
                peer_id,
                &SignalMessage::error(RelayErrorCode::NotInRoom, format!("{to} is not in your room")),
            );
            return;
        }

        self.send(&to, &msg.with_sender(peer_id.clone()));
    }

    pub fn send(&self, peer_id: &PeerId, msg: &SignalMessage) {
        let Some(peer) = self.inner.peers.get(peer_id) else {
            warn!("Attempted to send signal to disconnected peer {}", peer_id);
            return;
        };
        match encode_signal(msg) {
            Ok(json) => {
                if let Err(e) = peer.tx.send(json) {
                    error!("Failed to queue frame for {}: {}", peer_id, e);
                }
            }
            Err(e) => error!("Failed to serialize signal message: {}", e),
        }
    }

    pub fn room_count(&self) -> usize {
        self.inner.rooms.len()
    }

    pub fn occupants(&self, room: &RoomCode) -> Vec<PeerId> {
        self.inner
            .rooms
            .get(room)
            .map(|r| r.peers())
            .unwrap_or_default()
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}
