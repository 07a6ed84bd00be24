//! DeepTalk session and state-replication core.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod identity;
pub mod protocol;
pub mod wire;

pub use identity::{CardId, PeerId, RoomId, RoomIdError};
pub use protocol::{Channel, ChatPayload, Message, StateMessage, APP_ID, PROTOCOL_VERSION};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
pub use core::{CoreError, MessageError, OutboundAction, RoomEvent, TalkCore};

pub mod chat;
pub mod core;
pub mod invite;
pub mod replication;
pub mod resync;
pub mod session;
pub mod state;

pub use chat::{ChatError, ChatLog, ChatMessage, Origin};
pub use replication::{LastWriteWins, ReplicationChannel, ReplicationError, SyncMode};
pub use resync::ResyncPolicy;
pub use session::{Phase, Role, Session};
pub use state::{Card, Direction, SharedState, StateChange, StateError, StateKind};
