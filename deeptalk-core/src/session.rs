//! Session: which room this client is in, as what role, and whether the partner is there.

use crate::identity::{PeerId, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

/// Position in the per-client session state machine.
///
/// `NoSession -> WaitingForPeer <-> PeerPresent` when hosting,
/// `NoSession -> WaitingForHost <-> HostPresent` when guesting; leaving returns to `NoSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoSession,
    WaitingForPeer,
    PeerPresent,
    WaitingForHost,
    HostPresent,
}

impl Phase {
    /// Short status line for a status bar.
    pub fn describe(&self) -> &'static str {
        match self {
            Phase::NoSession => "not in a room",
            Phase::WaitingForPeer => "waiting for partner",
            Phase::PeerPresent => "partner connected",
            Phase::WaitingForHost => "still connecting",
            Phase::HostPresent => "connected to host",
        }
    }
}

/// What a peer-join event did to presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEdge {
    /// Absent -> present.
    Arrived,
    /// A different handle replaced the one already present (a rejoin whose leave was lost).
    Replaced,
    /// Same handle reported again.
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    room_id: RoomId,
    role: Role,
    peer: Option<PeerId>,
}

impl Session {
    pub fn new(room_id: RoomId, role: Role) -> Self {
        Self {
            room_id,
            role,
            peer: None,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }

    pub fn peer_present(&self) -> bool {
        self.peer.is_some()
    }

    pub fn phase(&self) -> Phase {
        match (self.role, self.peer_present()) {
            (Role::Host, false) => Phase::WaitingForPeer,
            (Role::Host, true) => Phase::PeerPresent,
            (Role::Guest, false) => Phase::WaitingForHost,
            (Role::Guest, true) => Phase::HostPresent,
        }
    }

    /// Record a peer as present.
    pub fn peer_joined(&mut self, peer: PeerId) -> PresenceEdge {
        let edge = match self.peer {
            None => PresenceEdge::Arrived,
            Some(p) if p == peer => PresenceEdge::Repeated,
            Some(_) => PresenceEdge::Replaced,
        };
        self.peer = Some(peer);
        edge
    }

    /// Record a peer as absent. Returns false if `peer` was not the one present.
    pub fn peer_left(&mut self, peer: PeerId) -> bool {
        if self.peer == Some(peer) {
            self.peer = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::parse("room1").unwrap()
    }

    #[test]
    fn host_phases() {
        let mut s = Session::new(room(), Role::Host);
        assert_eq!(s.phase(), Phase::WaitingForPeer);
        let p = PeerId::generate();
        assert_eq!(s.peer_joined(p), PresenceEdge::Arrived);
        assert_eq!(s.phase(), Phase::PeerPresent);
        assert!(s.peer_left(p));
        assert_eq!(s.phase(), Phase::WaitingForPeer);
    }

    #[test]
    fn guest_phases() {
        let mut s = Session::new(room(), Role::Guest);
        assert_eq!(s.phase(), Phase::WaitingForHost);
        s.peer_joined(PeerId::generate());
        assert_eq!(s.phase(), Phase::HostPresent);
        assert!(!s.is_host());
    }

    #[test]
    fn presence_edges() {
        let mut s = Session::new(room(), Role::Host);
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_eq!(s.peer_joined(a), PresenceEdge::Arrived);
        assert_eq!(s.peer_joined(a), PresenceEdge::Repeated);
        assert_eq!(s.peer_joined(b), PresenceEdge::Replaced);
        assert_eq!(s.peer(), Some(b));
    }

    #[test]
    fn leave_of_unknown_peer_is_ignored() {
        let mut s = Session::new(room(), Role::Host);
        let a = PeerId::generate();
        s.peer_joined(a);
        assert!(!s.peer_left(PeerId::generate()));
        assert!(s.peer_present());
    }
}
