use rally_core::{HostCredential, PeerId};

pub const ROOM_CAPACITY: usize = 2;

#[derive(Debug, Clone)]
pub(crate) struct Occupant {
    pub peer: PeerId,
    pub host: bool,
}

/// One room as the relay sees it: the creator's credential and who is inside.
#[derive(Debug)]
pub(crate) struct RelayRoom {
    credential: HostCredential,
    occupants: Vec<Occupant>,
}

impl RelayRoom {
    pub fn new(creator: PeerId, credential: HostCredential) -> Self {
        Self {
            credential,
            occupants: vec![Occupant {
                peer: creator,
                host: true,
            }],
        }
    }

    pub fn is_full(&self) -> bool {
        self.occupants.len() >= ROOM_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.occupants.iter().any(|o| &o.peer == peer)
    }

    /// Host status is granted only for the matching credential, and only when
    /// nobody inside already holds it.
    pub fn grants_host(&self, presented: Option<&HostCredential>) -> bool {
        presented == Some(&self.credential) && !self.occupants.iter().any(|o| o.host)
    }

    /// Adds `peer` and returns the occupants that were already there.
    pub fn admit(&mut self, peer: PeerId, host: bool) -> Vec<PeerId> {
        let others = self.peers();
        self.occupants.push(Occupant { peer, host });
        others
    }

    /// Removes `peer` and returns whoever is left.
    pub fn evict(&mut self, peer: &PeerId) -> Vec<PeerId> {
        self.occupants.retain(|o| &o.peer != peer);
        self.peers()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.occupants.iter().map(|o| o.peer.clone()).collect()
    }
}
