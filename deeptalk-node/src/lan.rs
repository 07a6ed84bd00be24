//! LAN transport: TCP listener plus outbound dials to discovered peers, Hello handshake,
//! length-prefixed frames. One link per peer pair.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deeptalk_core::wire::{decode_frame, encode_frame, frame_len, LEN_SIZE, MAX_FRAME_LEN};
use deeptalk_core::{Message, PeerId, RoomEvent, RoomId, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::discovery::{self, Discovered};
use crate::transport::{lock, EventSender, InboundEvent, RoomHandle, Transport, TransportError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LanTransport {
    local_id: PeerId,
    discovery_port: u16,
    transport_port: u16,
    /// Bound on first join and shared by every later room.
    sockets: Option<Sockets>,
}

#[derive(Clone)]
struct Sockets {
    discovery: Arc<UdpSocket>,
    listener: Arc<TcpListener>,
    listen_port: u16,
}

impl LanTransport {
    pub fn new(discovery_port: u16, transport_port: u16) -> Self {
        Self {
            local_id: PeerId::generate(),
            discovery_port,
            transport_port,
            sockets: None,
        }
    }

    fn sockets(&mut self) -> Result<Sockets, TransportError> {
        if let Some(sockets) = &self.sockets {
            return Ok(sockets.clone());
        }
        let std_listener = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.transport_port))?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let listen_port = listener.local_addr()?.port();
        let discovery = discovery::make_multicast_socket(self.discovery_port)?;
        let sockets = Sockets {
            discovery: Arc::new(discovery),
            listener: Arc::new(listener),
            listen_port,
        };
        self.sockets = Some(sockets.clone());
        Ok(sockets)
    }
}

#[derive(Default)]
struct LinkTable {
    links: HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>,
    dialing: HashSet<PeerId>,
}

type Links = Arc<Mutex<LinkTable>>;

/// Everything a link task needs about the room it serves.
#[derive(Clone)]
struct RoomCtx {
    room: RoomId,
    local_id: PeerId,
    links: Links,
    events: EventSender,
    stop: watch::Receiver<()>,
}

impl RoomCtx {
    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(InboundEvent {
            room: self.room.clone(),
            event,
        });
    }
}

impl Transport for LanTransport {
    fn join(&mut self, room: &RoomId, events: EventSender) -> Result<Box<dyn RoomHandle>, TransportError> {
        let Sockets {
            discovery: socket,
            listener,
            listen_port,
        } = self.sockets()?;
        let beacon = discovery::beacon_frame(room, self.local_id, listen_port)?;

        let (stop_tx, stop_rx) = watch::channel(());
        let ctx = RoomCtx {
            room: room.clone(),
            local_id: self.local_id,
            links: Arc::new(Mutex::new(LinkTable::default())),
            events,
            stop: stop_rx,
        };
        let (found_tx, found_rx) = mpsc::unbounded_channel();

        let discovery_port = self.discovery_port;
        let tasks = vec![
            tokio::spawn(discovery::beacon_loop(socket.clone(), beacon, discovery_port)),
            tokio::spawn({
                let room = room.clone();
                let local_id = self.local_id;
                async move {
                    if let Err(e) = discovery::recv_loop(socket, room, local_id, found_tx).await {
                        tracing::warn!(error = %e, "discovery stopped");
                    }
                }
            }),
            tokio::spawn(accept_loop(listener, ctx.clone())),
            tokio::spawn(dial_loop(found_rx, ctx.clone())),
        ];
        tracing::info!(%room, port = listen_port, peer = %self.local_id, "joined LAN room");
        Ok(Box::new(LanRoom {
            links: ctx.links,
            tasks,
            _stop: stop_tx,
        }))
    }

    fn local_id(&self) -> PeerId {
        self.local_id
    }
}

struct LanRoom {
    links: Links,
    tasks: Vec<JoinHandle<()>>,
    /// Dropping this ends every link task of the room.
    _stop: watch::Sender<()>,
}

impl RoomHandle for LanRoom {
    fn broadcast(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let table = lock(&self.links);
        for tx in table.links.values() {
            let _ = tx.send(frame.clone());
        }
        Ok(())
    }

    fn leave(self: Box<Self>) {
        for task in &self.tasks {
            task.abort();
        }
        lock(&self.links).links.clear();
    }
}

async fn accept_loop(listener: Arc<TcpListener>, ctx: RoomCtx) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    match handshake_accept(stream, &ctx).await {
                        Ok((stream, peer)) => run_link(stream, peer, ctx).await,
                        Err(e) => tracing::debug!(%addr, error = %e, "inbound handshake failed"),
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

async fn dial_loop(mut found_rx: mpsc::UnboundedReceiver<Discovered>, ctx: RoomCtx) {
    while let Some(found) = found_rx.recv().await {
        {
            let mut table = lock(&ctx.links);
            if table.links.contains_key(&found.peer_id) || !table.dialing.insert(found.peer_id) {
                continue;
            }
        }
        let ctx = ctx.clone();
        tokio::spawn(async move {
            match dial(found, &ctx).await {
                Ok(stream) => run_link(stream, found.peer_id, ctx).await,
                Err(e) => {
                    lock(&ctx.links).dialing.remove(&found.peer_id);
                    tracing::debug!(peer = %found.peer_id, addr = %found.addr, error = %e, "dial failed");
                }
            }
        });
    }
}

async fn dial(found: Discovered, ctx: &RoomCtx) -> Result<TcpStream, TransportError> {
    let mut stream = TcpStream::connect(found.addr).await?;
    let hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        write_frame(&mut stream, &hello_frame(ctx)?).await?;
        Ok::<_, TransportError>(read_hello(&mut stream, &ctx.room).await?)
    })
    .await
    .map_err(|_| handshake_error("handshake timed out"))??;
    if hello != found.peer_id {
        return Err(handshake_error("peer id does not match beacon"));
    }
    Ok(stream)
}

async fn handshake_accept(mut stream: TcpStream, ctx: &RoomCtx) -> Result<(TcpStream, PeerId), TransportError> {
    let peer = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        let peer = read_hello(&mut stream, &ctx.room).await?;
        write_frame(&mut stream, &hello_frame(ctx)?).await?;
        Ok::<_, TransportError>(peer)
    })
    .await
    .map_err(|_| handshake_error("handshake timed out"))??;
    Ok((stream, peer))
}

fn hello_frame(ctx: &RoomCtx) -> Result<Vec<u8>, TransportError> {
    Ok(encode_frame(&Message::Hello {
        protocol_version: PROTOCOL_VERSION,
        room_id: ctx.room.clone(),
        peer_id: ctx.local_id,
    })?)
}

async fn read_hello(stream: &mut TcpStream, room: &RoomId) -> Result<PeerId, TransportError> {
    let frame = read_frame(stream).await?;
    let (msg, _) = decode_frame(&frame).map_err(|_| handshake_error("bad hello frame"))?;
    match msg {
        Message::Hello {
            protocol_version,
            room_id,
            peer_id,
        } if protocol_version == PROTOCOL_VERSION && &room_id == room => Ok(peer_id),
        _ => Err(handshake_error("unexpected hello")),
    }
}

fn handshake_error(msg: &'static str) -> TransportError {
    TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &[u8]) -> std::io::Result<()> {
    w.write_all(frame).await?;
    w.flush().await
}

/// Read one whole frame, length prefix included.
async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Vec<u8>> {
    let mut frame = vec![0u8; LEN_SIZE];
    r.read_exact(&mut frame).await?;
    let len = frame_len(&frame).unwrap_or(0);
    if len > MAX_FRAME_LEN as usize {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }
    frame.resize(LEN_SIZE + len, 0);
    r.read_exact(&mut frame[LEN_SIZE..]).await?;
    Ok(frame)
}

/// Serve an established link until it closes or the room is left.
async fn run_link(stream: TcpStream, peer: PeerId, mut ctx: RoomCtx) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    {
        let mut table = lock(&ctx.links);
        table.dialing.remove(&peer);
        if table.links.contains_key(&peer) {
            tracing::debug!(%peer, "duplicate link dropped");
            return;
        }
        table.links.insert(peer, tx);
    }
    tracing::info!(%peer, "link up");
    ctx.emit(RoomEvent::PeerJoined(peer));

    let (mut reader, mut writer) = stream.into_split();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_frame(&mut writer, &frame).await.is_err() {
                break;
            }
        }
    });

    let events = ctx.clone();
    let closed = tokio::select! {
        _ = ctx.stop.changed() => false,
        _ = async {
            while let Ok(bytes) = read_frame(&mut reader).await {
                events.emit(RoomEvent::Received { from: peer, bytes });
            }
        } => true,
    };
    writer_task.abort();
    lock(&ctx.links).links.remove(&peer);
    if closed {
        tracing::info!(%peer, "link down");
        ctx.emit(RoomEvent::PeerLeft(peer));
    }
}
