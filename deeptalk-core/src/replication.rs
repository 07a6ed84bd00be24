//! State replication channel: holds the local SharedState and turns changes into wire messages.
//!
//! Conflict policy of [`LastWriteWins`]: no causal ordering. Whatever arrives last at a peer
//! is what that peer shows. In [`SyncMode::Snapshot`] a Sync carries every field, so the
//! later message replaces the earlier one's effect entirely. In [`SyncMode::Delta`] only the
//! fields a change touched travel and each side applies just the fields the other sent, so
//! after a race the two peers can show different states until the next change or resync.

use serde::Deserialize;

use crate::protocol::StateMessage;
use crate::state::{Card, SharedState, StateChange, StateError, StateKind};

/// What a Sync message carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Full snapshot tagged Sync.
    #[default]
    Snapshot,
    /// Only the fields named in the change.
    Delta,
}

/// Outcome of a received state message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// SessionStart (or a complete Sync with no prior state) replaced everything.
    Replaced,
    /// Sync fields merged into the existing state.
    Merged,
}

/// Replication strategy seam. The core is generic over it.
pub trait ReplicationChannel {
    /// Local copy, if a game is in progress.
    fn state(&self) -> Option<&SharedState>;

    /// Host: build and store the initial state. Returns the SessionStart to broadcast.
    fn start_session(
        &mut self,
        deck_name: &str,
        cards: Vec<Card>,
    ) -> Result<StateMessage, ReplicationError>;

    /// Apply a locally originated change. Called before [`ReplicationChannel::publish_update`].
    fn apply_local(&mut self, change: &StateChange) -> Result<(), ReplicationError>;

    /// Sync message for a change already applied locally.
    fn publish_update(&self, change: &StateChange) -> Result<StateMessage, ReplicationError>;

    /// Apply a message received from the peer. On error the local state is untouched.
    fn on_remote(&mut self, msg: &StateMessage) -> Result<Applied, ReplicationError>;

    /// Full SessionStart snapshot for a peer that joined late.
    fn resync_snapshot(&self) -> Option<StateMessage>;

    /// Drop the state (session ended or reset).
    fn clear(&mut self);
}

/// Broadcast-and-apply replication with last-write-wins semantics.
#[derive(Debug, Default)]
pub struct LastWriteWins {
    state: Option<SharedState>,
    mode: SyncMode,
}

impl LastWriteWins {
    pub fn new(mode: SyncMode) -> Self {
        Self { state: None, mode }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }
}

impl ReplicationChannel for LastWriteWins {
    fn state(&self) -> Option<&SharedState> {
        self.state.as_ref()
    }

    fn start_session(
        &mut self,
        deck_name: &str,
        cards: Vec<Card>,
    ) -> Result<StateMessage, ReplicationError> {
        let state = SharedState::start(deck_name, cards)?;
        let msg = StateMessage::snapshot(&state, StateKind::SessionStart);
        self.state = Some(state);
        Ok(msg)
    }

    fn apply_local(&mut self, change: &StateChange) -> Result<(), ReplicationError> {
        let state = self.state.as_mut().ok_or(ReplicationError::NoState)?;
        state.apply(change)?;
        state.set_kind(StateKind::Sync);
        Ok(())
    }

    fn publish_update(&self, change: &StateChange) -> Result<StateMessage, ReplicationError> {
        let state = self.state.as_ref().ok_or(ReplicationError::NoState)?;
        Ok(match self.mode {
            SyncMode::Snapshot => StateMessage::snapshot(state, StateKind::Sync),
            SyncMode::Delta => StateMessage::delta(change),
        })
    }

    fn on_remote(&mut self, msg: &StateMessage) -> Result<Applied, ReplicationError> {
        if msg.kind == StateKind::SessionStart || self.state.is_none() {
            let state = msg.to_state().ok_or(ReplicationError::Malformed)?;
            self.state = Some(state);
            return Ok(Applied::Replaced);
        }
        let state = self.state.as_mut().ok_or(ReplicationError::NoState)?;
        let change = msg.as_change();
        if change.is_empty() && msg.deck_name.is_none() {
            return Err(ReplicationError::Malformed);
        }
        state
            .apply(&change)
            .map_err(|_| ReplicationError::Malformed)?;
        if let Some(name) = &msg.deck_name {
            state.set_deck_name(name.clone());
        }
        state.set_kind(StateKind::Sync);
        Ok(Applied::Merged)
    }

    fn resync_snapshot(&self) -> Option<StateMessage> {
        self.state
            .as_ref()
            .map(|s| StateMessage::snapshot(s, StateKind::SessionStart))
    }

    fn clear(&mut self) {
        self.state = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicationError {
    #[error("no game in progress")]
    NoState,
    #[error("malformed state message")]
    Malformed,
    #[error(transparent)]
    State(#[from] StateError),
}
