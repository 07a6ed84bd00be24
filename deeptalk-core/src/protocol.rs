//! DeepTalk wire protocol: message types, channels and version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{CardId, PeerId, RoomId};
use crate::state::{Card, Direction, SharedState, StateChange, StateKind};

/// Current protocol version. Used in beacon and hello.
pub const PROTOCOL_VERSION: u8 = 1;

/// Application id. Peers of other applications sharing a discovery port are ignored.
pub const APP_ID: &str = "deeptalk-lovecard-v1";

/// Named channels multiplexed over one room. The variant of [`Message`] selects the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Game state snapshots and syncs.
    Update,
    Chat,
    /// Link maintenance (discovery, handshake). Never reaches the session layer.
    Link,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Update => "update",
            Channel::Chat => "chat",
            Channel::Link => "link",
        }
    }
}

/// All wire message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Discovery: advertise membership of a room and where to connect.
    Beacon {
        protocol_version: u8,
        app_id: String,
        room_id: RoomId,
        peer_id: PeerId,
        listen_port: u16,
    },
    /// First frame on a new link, sent by both sides.
    Hello {
        protocol_version: u8,
        room_id: RoomId,
        peer_id: PeerId,
    },
    /// Shared game state (channel "update").
    State(StateMessage),
    /// Chat remark (channel "chat").
    Chat(ChatPayload),
}

impl Message {
    pub fn channel(&self) -> Channel {
        match self {
            Message::Beacon { .. } | Message::Hello { .. } => Channel::Link,
            Message::State(_) => Channel::Update,
            Message::Chat(_) => Channel::Chat,
        }
    }
}

/// SharedState on the wire. Every field but `kind` may be absent: a Sync applies only what it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMessage {
    pub kind: StateKind,
    pub deck_name: Option<String>,
    pub cards: Option<Vec<Card>>,
    pub card_index: Option<usize>,
    pub revealed: Option<bool>,
    pub navigation_direction: Option<Direction>,
}

impl StateMessage {
    /// Full snapshot of `state`, tagged with `kind`.
    pub fn snapshot(state: &SharedState, kind: StateKind) -> Self {
        Self {
            kind,
            deck_name: Some(state.deck_name().to_owned()),
            cards: Some(state.cards().to_vec()),
            card_index: Some(state.card_index()),
            revealed: Some(state.revealed()),
            navigation_direction: Some(state.navigation_direction()),
        }
    }

    /// Sync carrying only the fields named in `change`.
    pub fn delta(change: &StateChange) -> Self {
        Self {
            kind: StateKind::Sync,
            deck_name: None,
            cards: change.cards.clone(),
            card_index: change.card_index,
            revealed: change.revealed,
            navigation_direction: change.navigation_direction,
        }
    }

    /// The fields other than deck name, as a change to apply.
    pub fn as_change(&self) -> StateChange {
        StateChange {
            card_index: self.card_index,
            revealed: self.revealed,
            navigation_direction: self.navigation_direction,
            cards: self.cards.clone(),
        }
    }

    /// Build a complete state if every field is present.
    pub fn to_state(&self) -> Option<SharedState> {
        SharedState::from_parts(
            self.kind,
            self.deck_name.clone()?,
            self.cards.clone()?,
            self.card_index?,
            self.revealed?,
            self.navigation_direction?,
        )
        .ok()
    }
}

/// Chat remark on the wire. `sent_at` is Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
    pub card_id: CardId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,
}
