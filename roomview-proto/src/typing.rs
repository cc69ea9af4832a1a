//! Typing notification payloads.

use serde::{Deserialize, Serialize};

use crate::event::{RoomId, UserId};

/// The full set of users currently typing in a room.
///
/// Typing pushes are snapshots, not deltas: each one replaces the previous
/// list for its room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingUpdate {
    /// The room the notification belongs to.
    pub room_id: RoomId,
    /// Everyone typing in the room, possibly including the local user.
    pub user_ids: Vec<UserId>,
}
