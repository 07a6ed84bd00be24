//! LAN discovery: UDP multicast beacon per joined room; pick which newly seen peers to dial.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use deeptalk_core::wire::{decode_frame, encode_frame};
use deeptalk_core::{Message, PeerId, RoomId, APP_ID, PROTOCOL_VERSION};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::transport::TransportError;

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);
pub const BEACON_INTERVAL: Duration = Duration::from_secs(2);

/// Peer seen on the network, announced for the same room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovered {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
}

pub fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

pub fn beacon_frame(room: &RoomId, local_id: PeerId, listen_port: u16) -> Result<Vec<u8>, TransportError> {
    Ok(encode_frame(&Message::Beacon {
        protocol_version: PROTOCOL_VERSION,
        app_id: APP_ID.to_owned(),
        room_id: room.clone(),
        peer_id: local_id,
        listen_port,
    })?)
}

pub async fn beacon_loop(socket: Arc<UdpSocket>, frame: Vec<u8>, discovery_port: u16) {
    let dest = SocketAddr::from((MULTICAST_GROUP, discovery_port));
    let mut ticker = tokio::time::interval(BEACON_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send_to(&frame, dest).await {
            tracing::debug!(error = %e, "beacon send failed");
        }
    }
}

/// Read beacons; forward peers of `room` that this node should dial.
pub async fn recv_loop(
    socket: Arc<UdpSocket>,
    room: RoomId,
    local_id: PeerId,
    found_tx: mpsc::UnboundedSender<Discovered>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 65536];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let Ok((msg, _)) = decode_frame(&buf[..n]) else {
            continue;
        };
        if let Some(found) = accept_beacon(&msg, &room, local_id, from) {
            if found_tx.send(found).is_err() {
                return Ok(());
            }
        }
    }
}

/// A beacon worth dialing: same app, version and room, another peer, and a higher id than ours.
/// The lower id dials so each pair gets exactly one link.
pub fn accept_beacon(msg: &Message, room: &RoomId, local_id: PeerId, from: SocketAddr) -> Option<Discovered> {
    let Message::Beacon {
        protocol_version,
        app_id,
        room_id,
        peer_id,
        listen_port,
    } = msg
    else {
        return None;
    };
    if *protocol_version != PROTOCOL_VERSION || app_id != APP_ID || room_id != room {
        return None;
    }
    if *peer_id <= local_id {
        return None;
    }
    Some(Discovered {
        peer_id: *peer_id,
        addr: SocketAddr::new(from.ip(), *listen_port),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (PeerId, PeerId) {
        let a = PeerId::generate();
        let b = PeerId::generate();
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn beacon(room: &RoomId, peer: PeerId) -> Message {
        let frame = beacon_frame(room, peer, 4000).unwrap();
        decode_frame(&frame).unwrap().0
    }

    #[test]
    fn lower_id_dials() {
        let room = RoomId::generate();
        let (low, high) = ids();
        let from: SocketAddr = "192.168.1.7:45680".parse().unwrap();
        let found = accept_beacon(&beacon(&room, high), &room, low, from).unwrap();
        assert_eq!(found.peer_id, high);
        assert_eq!(found.addr, "192.168.1.7:4000".parse::<SocketAddr>().unwrap());
        assert!(accept_beacon(&beacon(&room, low), &room, high, from).is_none());
    }

    #[test]
    fn own_and_foreign_beacons_ignored() {
        let room = RoomId::generate();
        let (low, high) = ids();
        let from: SocketAddr = "10.0.0.2:45680".parse().unwrap();
        assert!(accept_beacon(&beacon(&room, low), &room, low, from).is_none());
        assert!(accept_beacon(&beacon(&RoomId::generate(), high), &room, low, from).is_none());

        let foreign = Message::Beacon {
            protocol_version: PROTOCOL_VERSION,
            app_id: "other-app".into(),
            room_id: room.clone(),
            peer_id: high,
            listen_port: 4000,
        };
        assert!(accept_beacon(&foreign, &room, low, from).is_none());
    }
}
