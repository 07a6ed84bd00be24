//! Late-join policy: when the host re-sends the full state to the room.

use serde::Deserialize;

use crate::session::{PresenceEdge, Role};

/// Which peer-join events trigger a full resend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResyncPolicy {
    /// Every join, including a new handle replacing one already present.
    #[default]
    EveryJoin,
    /// Only absent -> present transitions.
    PresenceEdge,
}

/// Host with a game in progress answers a join with a SessionStart snapshot.
pub fn should_resync(policy: ResyncPolicy, role: Role, edge: PresenceEdge, has_state: bool) -> bool {
    if role != Role::Host || !has_state {
        return false;
    }
    match policy {
        ResyncPolicy::EveryJoin => true,
        ResyncPolicy::PresenceEdge => edge == PresenceEdge::Arrived,
    }
}
