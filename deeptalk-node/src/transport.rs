//! Transport adapters: join a room, fan frames out to its members, report presence and frames
//! as room-tagged events on the control task's queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use deeptalk_core::{PeerId, RoomEvent, RoomId};
use tokio::sync::mpsc;

/// Event from a transport, tagged with the room whose handle produced it.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub room: RoomId,
    pub event: RoomEvent,
}

pub type EventSender = mpsc::UnboundedSender<InboundEvent>;

/// Opens rooms. One handle per joined room.
pub trait Transport: Send {
    /// Join `room`. Presence and received frames arrive on `events` until the handle leaves.
    fn join(&mut self, room: &RoomId, events: EventSender) -> Result<Box<dyn RoomHandle>, TransportError>;

    /// Identity other members see for this client.
    fn local_id(&self) -> PeerId;
}

/// Membership of one room.
pub trait RoomHandle: Send {
    /// Send one frame to every other current member. Never delivered back to the sender.
    fn broadcast(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Leave the room and stop delivering its events.
    fn leave(self: Box<Self>);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("room handle closed")]
    Closed,
    #[error("encode: {0}")]
    Encode(#[from] deeptalk_core::FrameEncodeError),
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Member {
    peer: PeerId,
    events: EventSender,
}

/// In-process room registry. Each client gets its own [`MemoryTransport`] on a shared hub;
/// delivery is one FIFO queue per client.
#[derive(Clone, Default)]
pub struct MemoryHub {
    rooms: Arc<Mutex<HashMap<RoomId, Vec<Member>>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            local_id: PeerId::generate(),
        }
    }
}

pub struct MemoryTransport {
    hub: MemoryHub,
    local_id: PeerId,
}

impl Transport for MemoryTransport {
    fn join(&mut self, room: &RoomId, events: EventSender) -> Result<Box<dyn RoomHandle>, TransportError> {
        let mut rooms = lock(&self.hub.rooms);
        let members = rooms.entry(room.clone()).or_default();
        members.retain(|m| m.peer != self.local_id);
        for m in members.iter() {
            let _ = m.events.send(InboundEvent {
                room: room.clone(),
                event: RoomEvent::PeerJoined(self.local_id),
            });
            let _ = events.send(InboundEvent {
                room: room.clone(),
                event: RoomEvent::PeerJoined(m.peer),
            });
        }
        members.push(Member {
            peer: self.local_id,
            events,
        });
        tracing::debug!(%room, peer = %self.local_id, "joined memory room");
        Ok(Box::new(MemoryRoom {
            hub: self.hub.clone(),
            room: room.clone(),
            local_id: self.local_id,
        }))
    }

    fn local_id(&self) -> PeerId {
        self.local_id
    }
}

struct MemoryRoom {
    hub: MemoryHub,
    room: RoomId,
    local_id: PeerId,
}

impl RoomHandle for MemoryRoom {
    fn broadcast(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let rooms = lock(&self.hub.rooms);
        let members = rooms.get(&self.room).ok_or(TransportError::Closed)?;
        if !members.iter().any(|m| m.peer == self.local_id) {
            return Err(TransportError::Closed);
        }
        for m in members.iter().filter(|m| m.peer != self.local_id) {
            let _ = m.events.send(InboundEvent {
                room: self.room.clone(),
                event: RoomEvent::Received {
                    from: self.local_id,
                    bytes: frame.clone(),
                },
            });
        }
        Ok(())
    }

    fn leave(self: Box<Self>) {
        let mut rooms = lock(&self.hub.rooms);
        let Some(members) = rooms.get_mut(&self.room) else {
            return;
        };
        members.retain(|m| m.peer != self.local_id);
        for m in members.iter() {
            let _ = m.events.send(InboundEvent {
                room: self.room.clone(),
                event: RoomEvent::PeerLeft(self.local_id),
            });
        }
        if members.is_empty() {
            rooms.remove(&self.room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(hub: &MemoryHub, room: &RoomId) -> usize {
        lock(&hub.rooms).get(room).map_or(0, Vec::len)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<InboundEvent>) -> Vec<RoomEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.event);
        }
        out
    }

    #[test]
    fn members_see_each_other_and_frames() {
        let hub = MemoryHub::new();
        let (mut a, mut b) = (hub.transport(), hub.transport());
        let room = RoomId::generate();
        let (atx, mut arx) = mpsc::unbounded_channel();
        let (btx, mut brx) = mpsc::unbounded_channel();
        let ha = a.join(&room, atx).unwrap();
        let hb = b.join(&room, btx).unwrap();

        assert!(matches!(drain(&mut arx)[..], [RoomEvent::PeerJoined(p)] if p == b.local_id()));
        assert!(matches!(drain(&mut brx)[..], [RoomEvent::PeerJoined(p)] if p == a.local_id()));

        ha.broadcast(vec![1, 2, 3]).unwrap();
        assert!(drain(&mut arx).is_empty());
        match &drain(&mut brx)[..] {
            [RoomEvent::Received { from, bytes }] => {
                assert_eq!(*from, a.local_id());
                assert_eq!(bytes, &vec![1, 2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }

        hb.leave();
        assert!(matches!(drain(&mut arx)[..], [RoomEvent::PeerLeft(p)] if p == b.local_id()));
        assert_eq!(members(&hub, &room), 1);
        ha.leave();
        assert_eq!(members(&hub, &room), 0);
    }

    #[test]
    fn rooms_are_isolated() {
        let hub = MemoryHub::new();
        let (mut a, mut b) = (hub.transport(), hub.transport());
        let (atx, _arx) = mpsc::unbounded_channel();
        let (btx, mut brx) = mpsc::unbounded_channel();
        let ha = a.join(&RoomId::generate(), atx).unwrap();
        let _hb = b.join(&RoomId::generate(), btx).unwrap();
        ha.broadcast(vec![9]).unwrap();
        assert!(drain(&mut brx).is_empty());
    }

    #[test]
    fn broadcast_after_rejoin_elsewhere_fails() {
        let hub = MemoryHub::new();
        let mut a = hub.transport();
        let room = RoomId::generate();
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = a.join(&room, tx.clone()).unwrap();
        let second = a.join(&room, tx).unwrap();
        assert_eq!(members(&hub, &room), 1);
        second.leave();
        assert!(matches!(first.broadcast(vec![0]), Err(TransportError::Closed)));
    }
}
