//! Push notifications delivered by the event log service.

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventId, RoomId};
use crate::typing::TypingUpdate;

/// Subscription channel a push belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PushKind {
    /// A new event reached the live end of a room (redactions included).
    NewEvent,
    /// A local echo changed status or received its canonical id.
    LocalEchoUpdated,
    /// The typing set of a room changed.
    Typing,
}

/// A single push notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Push {
    /// A new event was appended to the room's live timeline.
    NewEvent {
        /// The event as it appears in the log.
        event: Event,
    },
    /// A local echo transitioned (pending -> sent / error, id rewrite).
    LocalEchoUpdated {
        /// The echo in its new state.
        event: Event,
        /// The id the echo was known by before this update.
        previous_id: EventId,
    },
    /// A typing snapshot for a room.
    Typing(TypingUpdate),
}

impl Push {
    /// The subscription kind this push is delivered on.
    #[must_use]
    pub const fn kind(&self) -> PushKind {
        match self {
            Self::NewEvent { .. } => PushKind::NewEvent,
            Self::LocalEchoUpdated { .. } => PushKind::LocalEchoUpdated,
            Self::Typing(_) => PushKind::Typing,
        }
    }

    /// The room this push is scoped to.
    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        match self {
            Self::NewEvent { event } | Self::LocalEchoUpdated { event, .. } => &event.room_id,
            Self::Typing(update) => &update.room_id,
        }
    }
}
