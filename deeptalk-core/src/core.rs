//! Host-driven API: TalkCore receives events from host, returns actions.
//!
//! The host owns the transport. It executes `OpenRoom`/`CloseRoom`/`Broadcast`, feeds
//! presence and received frames back in, and re-renders on `StateChanged`/`ChatAppended`.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::chat::{ChatError, ChatLog, ChatMessage};
use crate::identity::{CardId, PeerId, RoomId};
use crate::protocol::{Channel, Message, StateMessage};
use crate::replication::{LastWriteWins, ReplicationChannel, ReplicationError, SyncMode};
use crate::resync::{self, ResyncPolicy};
use crate::session::{Phase, Role, Session};
use crate::state::{Card, SharedState, StateChange};
use crate::wire;

/// Inbound event from the transport, in the order the host observed it.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    Received { from: PeerId, bytes: Vec<u8> },
}

/// Action for host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundAction {
    /// Open a transport room. Any previously opened room has been closed by a preceding `CloseRoom`.
    OpenRoom { room_id: RoomId, role: Role },
    CloseRoom { room_id: RoomId },
    /// Send a frame to every current member of the room.
    Broadcast { channel: Channel, frame: Vec<u8> },
    /// Local SharedState changed (or was cleared); re-render.
    StateChanged,
    ChatAppended(ChatMessage),
}

/// Session manager. Owns the session, the replicated state and the chat log.
pub struct TalkCore<R: ReplicationChannel = LastWriteWins> {
    session: Option<Session>,
    replication: R,
    chat: ChatLog,
    resync_policy: ResyncPolicy,
}

impl TalkCore<LastWriteWins> {
    pub fn new() -> Self {
        Self::with_replication(LastWriteWins::default())
    }

    pub fn with_sync_mode(mode: SyncMode) -> Self {
        Self::with_replication(LastWriteWins::new(mode))
    }
}

impl Default for TalkCore<LastWriteWins> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ReplicationChannel> TalkCore<R> {
    pub fn with_replication(replication: R) -> Self {
        Self {
            session: None,
            replication,
            chat: ChatLog::new(),
            resync_policy: ResyncPolicy::default(),
        }
    }

    /// Set which peer-join events make the host re-send the full state.
    pub fn set_resync_policy(&mut self, policy: ResyncPolicy) {
        self.resync_policy = policy;
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.session
            .as_ref()
            .map(Session::phase)
            .unwrap_or(Phase::NoSession)
    }

    pub fn state(&self) -> Option<&SharedState> {
        self.replication.state()
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    /// Chat about one card, in arrival order at this client.
    pub fn messages_for<'a>(
        &'a self,
        card_id: &CardId,
    ) -> impl Iterator<Item = &'a ChatMessage> + 'a {
        self.chat.messages_for(card_id)
    }

    /// Chat about the card currently in play.
    pub fn current_messages(&self) -> Vec<&ChatMessage> {
        match self.state() {
            Some(state) => self.chat.messages_for(&state.current_card().id).collect(),
            None => Vec::new(),
        }
    }

    /// Make a fresh room and host it.
    pub fn create_room(&mut self) -> (RoomId, Vec<OutboundAction>) {
        let room_id = RoomId::generate();
        let actions = self.connect(room_id.clone(), Role::Host);
        (room_id, actions)
    }

    /// Join a room someone else is hosting.
    pub fn join_room(&mut self, room_id: RoomId) -> Vec<OutboundAction> {
        self.connect(room_id, Role::Guest)
    }

    fn connect(&mut self, room_id: RoomId, role: Role) -> Vec<OutboundAction> {
        let mut actions = self.leave_room();
        tracing::info!(room = %room_id, ?role, "opening room");
        self.session = Some(Session::new(room_id.clone(), role));
        actions.push(OutboundAction::OpenRoom { room_id, role });
        actions
    }

    /// Close the room and drop session, state and chat. No-op without a session.
    pub fn leave_room(&mut self) -> Vec<OutboundAction> {
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        tracing::info!(room = %session.room_id(), "leaving room");
        let had_state = self.replication.state().is_some();
        self.replication.clear();
        self.chat.clear();
        let mut actions = vec![OutboundAction::CloseRoom {
            room_id: session.room_id().clone(),
        }];
        if had_state {
            actions.push(OutboundAction::StateChanged);
        }
        actions
    }

    /// Peer appeared. Host with a game in progress re-sends the full state.
    pub fn on_peer_joined(&mut self, peer: PeerId) -> Vec<OutboundAction> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let edge = session.peer_joined(peer);
        tracing::info!(%peer, ?edge, "peer joined");
        let has_state = self.replication.state().is_some();
        if !resync::should_resync(self.resync_policy, session.role(), edge, has_state) {
            return Vec::new();
        }
        match self.replication.resync_snapshot() {
            Some(snapshot) => {
                tracing::debug!(%peer, "re-sending state to late joiner");
                broadcast_state(&snapshot).into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Peer went away. State is kept so the remaining player can continue.
    pub fn on_peer_left(&mut self, peer: PeerId) {
        if let Some(session) = self.session.as_mut() {
            if session.peer_left(peer) {
                tracing::info!(%peer, "peer left");
            } else {
                tracing::debug!(%peer, "leave for a peer that is not present");
            }
        }
    }

    /// Host: start a game with `cards`. Stores the state locally and broadcasts it.
    pub fn start_session(
        &mut self,
        deck_name: &str,
        cards: Vec<Card>,
    ) -> Result<Vec<OutboundAction>, CoreError> {
        let session = self.session.as_ref().ok_or(CoreError::NoSession)?;
        if !session.is_host() {
            return Err(CoreError::NotHost);
        }
        let msg = self.replication.start_session(deck_name, cards)?;
        tracing::info!(deck = deck_name, "game started");
        let mut actions: Vec<OutboundAction> = broadcast_state(&msg).into_iter().collect();
        actions.push(OutboundAction::StateChanged);
        Ok(actions)
    }

    /// Apply a gameplay change locally, then broadcast it. Either peer may call this.
    pub fn publish_update(
        &mut self,
        change: StateChange,
    ) -> Result<Vec<OutboundAction>, CoreError> {
        if self.session.is_none() {
            return Err(CoreError::NoSession);
        }
        self.replication.apply_local(&change)?;
        let msg = self.replication.publish_update(&change)?;
        let mut actions: Vec<OutboundAction> = broadcast_state(&msg).into_iter().collect();
        actions.push(OutboundAction::StateChanged);
        Ok(actions)
    }

    /// Advance one card. Nothing happens at the last card.
    pub fn next_card(&mut self) -> Result<Vec<OutboundAction>, CoreError> {
        match self.current_state()?.next() {
            Some(change) => self.publish_update(change),
            None => Ok(Vec::new()),
        }
    }

    /// Go back one card. Nothing happens at the first card.
    pub fn previous_card(&mut self) -> Result<Vec<OutboundAction>, CoreError> {
        match self.current_state()?.previous() {
            Some(change) => self.publish_update(change),
            None => Ok(Vec::new()),
        }
    }

    pub fn flip_card(&mut self) -> Result<Vec<OutboundAction>, CoreError> {
        let change = self.current_state()?.flip();
        self.publish_update(change)
    }

    pub fn shuffle_cards(&mut self) -> Result<Vec<OutboundAction>, CoreError> {
        self.shuffle_cards_with(&mut rand::thread_rng())
    }

    pub fn shuffle_cards_with<G: Rng + ?Sized>(
        &mut self,
        rng: &mut G,
    ) -> Result<Vec<OutboundAction>, CoreError> {
        let change = self.current_state()?.shuffle(rng);
        self.publish_update(change)
    }

    fn current_state(&self) -> Result<&SharedState, CoreError> {
        if self.session.is_none() {
            return Err(CoreError::NoSession);
        }
        self.replication
            .state()
            .ok_or(CoreError::Replication(ReplicationError::NoState))
    }

    /// Send a chat remark about `card_id`. Echoed locally right away.
    pub fn send_chat(
        &mut self,
        text: &str,
        card_id: CardId,
    ) -> Result<Vec<OutboundAction>, CoreError> {
        self.send_chat_at(text, card_id, Utc::now())
    }

    pub fn send_chat_at(
        &mut self,
        text: &str,
        card_id: CardId,
        sent_at: DateTime<Utc>,
    ) -> Result<Vec<OutboundAction>, CoreError> {
        if self.session.is_none() {
            return Err(CoreError::NoSession);
        }
        let msg = self.chat.append_local(text, card_id, sent_at)?.clone();
        let mut actions = Vec::new();
        match wire::encode_frame(&Message::Chat(msg.payload())) {
            Ok(frame) => actions.push(OutboundAction::Broadcast {
                channel: Channel::Chat,
                frame,
            }),
            Err(e) => tracing::warn!(error = %e, "chat message not sent"),
        }
        actions.push(OutboundAction::ChatAppended(msg));
        Ok(actions)
    }

    /// Process a received frame: decode, then apply state or append chat.
    pub fn on_message_received(
        &mut self,
        from: PeerId,
        bytes: &[u8],
    ) -> Result<Vec<OutboundAction>, MessageError> {
        if self.session.is_none() {
            return Err(MessageError::NoSession);
        }
        let (msg, _consumed) =
            wire::decode_frame(bytes).map_err(|_| MessageError::DecodeFailed)?;

        match msg {
            Message::State(state) => {
                let applied = self
                    .replication
                    .on_remote(&state)
                    .map_err(|_| MessageError::Malformed)?;
                tracing::debug!(%from, ?applied, kind = ?state.kind, "state received");
                Ok(vec![OutboundAction::StateChanged])
            }
            Message::Chat(payload) => {
                let msg = self
                    .chat
                    .append_remote(payload)
                    .map_err(|_| MessageError::Malformed)?
                    .clone();
                Ok(vec![OutboundAction::ChatAppended(msg)])
            }
            Message::Beacon { .. } | Message::Hello { .. } => Ok(Vec::new()),
        }
    }

    fn check_room(&self, room_id: &RoomId) -> Result<(), MessageError> {
        match self.session.as_ref() {
            Some(s) if s.room_id() == room_id => Ok(()),
            Some(_) => Err(MessageError::StaleRoom),
            None => Err(MessageError::NoSession),
        }
    }

    /// Single entry point for the host's event queue. Events from a room other than the
    /// current one are dropped; bad frames are logged and dropped.
    pub fn handle(&mut self, room_id: &RoomId, event: RoomEvent) -> Vec<OutboundAction> {
        if let Err(e) = self.check_room(room_id) {
            tracing::debug!(room = %room_id, error = %e, "dropping event");
            return Vec::new();
        }
        match event {
            RoomEvent::PeerJoined(peer) => self.on_peer_joined(peer),
            RoomEvent::PeerLeft(peer) => {
                self.on_peer_left(peer);
                Vec::new()
            }
            RoomEvent::Received { from, bytes } => {
                match self.on_message_received(from, &bytes) {
                    Ok(actions) => actions,
                    Err(e) => {
                        tracing::warn!(%from, error = %e, "ignoring message");
                        Vec::new()
                    }
                }
            }
        }
    }
}

fn broadcast_state(msg: &StateMessage) -> Option<OutboundAction> {
    match wire::encode_frame(&Message::State(msg.clone())) {
        Ok(frame) => Some(OutboundAction::Broadcast {
            channel: Channel::Update,
            frame,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "state not broadcast");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("not in a room")]
    NoSession,
    #[error("only the host can start a game")]
    NotHost,
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("not in a room")]
    NoSession,
    #[error("failed to decode message")]
    DecodeFailed,
    #[error("malformed message")]
    Malformed,
    #[error("event from a room this client has left")]
    StaleRoom,
}
