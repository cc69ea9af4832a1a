//! Typing peers of the active room.

use roomview_proto::event::{RoomId, UserId};
use roomview_proto::typing::TypingUpdate;

/// The set of remote users typing in the focused room.
#[derive(Debug, Clone)]
pub struct TypingTracker {
    local_user: UserId,
    active_room: Option<RoomId>,
    users: Vec<UserId>,
}

impl TypingTracker {
    /// Creates a tracker with no active room.
    #[must_use]
    pub const fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            active_room: None,
            users: Vec::new(),
        }
    }

    /// Switches to `room` (or to nothing) and clears the set.
    pub fn focus(&mut self, room: Option<RoomId>) {
        self.active_room = room;
        self.users.clear();
    }

    /// Replaces the set with `update` if it is for the active room.
    ///
    /// The local user is never part of the set. Returns whether the update
    /// was applied.
    pub fn apply(&mut self, update: &TypingUpdate) -> bool {
        if self.active_room.as_ref() != Some(&update.room_id) {
            return false;
        }
        self.users = update
            .user_ids
            .iter()
            .filter(|user| **user != self.local_user)
            .cloned()
            .collect();
        true
    }

    /// Users currently typing, in push order.
    #[must_use]
    pub fn users(&self) -> &[UserId] {
        &self.users
    }
}

/// Status-line copy for a set of typing users.
#[must_use]
pub fn typing_notice(users: &[UserId]) -> Option<String> {
    match users {
        [] => None,
        [one] => Some(format!("{one} is typing")),
        [a, b] => Some(format!("{a} and {b} are typing")),
        _ => Some("several people are typing".to_owned()),
    }
}
