//! Per-room synchronization state that outlives a focus.
//!
//! A [`RoomSyncState`] is created the first time a room is focused and kept
//! for the rest of the session, so that leaving a room and coming back
//! restores its backfill-terminal state and receipt bookkeeping.

use std::collections::HashMap;

use roomview_proto::event::{EventId, RoomId};

/// Session-long bookkeeping for one room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSyncState {
    fully_scrolled: bool,
    last_receipt_sent: Option<EventId>,
}

impl RoomSyncState {
    /// Whether the start of the room's history has been reached.
    #[must_use]
    pub const fn fully_scrolled(&self) -> bool {
        self.fully_scrolled
    }

    /// Records that no older history exists. Never reset for the session.
    pub fn mark_fully_scrolled(&mut self) {
        self.fully_scrolled = true;
    }

    /// The newest event a read receipt was successfully sent for.
    #[must_use]
    pub const fn last_receipt_sent(&self) -> Option<&EventId> {
        self.last_receipt_sent.as_ref()
    }

    /// Records a successfully sent receipt.
    pub fn record_receipt(&mut self, event_id: EventId) {
        self.last_receipt_sent = Some(event_id);
    }
}

/// Lookup of [`RoomSyncState`] by room id, populated lazily.
#[derive(Debug, Default)]
pub struct RoomSyncRegistry {
    rooms: HashMap<RoomId, RoomSyncState>,
}

impl RoomSyncRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The state of `room`, created on first access.
    pub fn entry(&mut self, room: &RoomId) -> &mut RoomSyncState {
        self.rooms.entry(room.clone()).or_insert_with(|| {
            tracing::debug!(room_id = %room, "tracking new room");
            RoomSyncState::default()
        })
    }

    /// The state of `room`, if it was ever focused.
    #[must_use]
    pub fn get(&self, room: &RoomId) -> Option<&RoomSyncState> {
        self.rooms.get(room)
    }

    /// Whether `room` has been marked fully scrolled this session.
    #[must_use]
    pub fn is_fully_scrolled(&self, room: &RoomId) -> bool {
        self.rooms.get(room).is_some_and(RoomSyncState::fully_scrolled)
    }

    /// Number of rooms tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room has been tracked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
