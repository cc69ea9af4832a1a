//! Timeline event types.
//!
//! An [`Event`] is one entry of a room's event log as the client sees it:
//! confirmed events carry the server-assigned id, local echoes carry a
//! temporary transaction id until the server confirms them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque event payload, keyed by message subtype (`msgtype`, `body`, ...).
pub type Content = Map<String, Value>;

/// Prefix used for the temporary ids of local echoes.
pub const LOCAL_ECHO_PREFIX: &str = "~";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }
    };
}

string_id!(
    /// Identifier of an event, unique within its room.
    EventId
);

string_id!(
    /// Stable identifier of a room.
    RoomId
);

string_id!(
    /// Identifier of a user (local or remote).
    UserId
);

impl EventId {
    /// Creates a fresh temporary id for a local echo (UUID v7 transaction id).
    #[must_use]
    pub fn local_echo() -> Self {
        Self(format!("{LOCAL_ECHO_PREFIX}{}", Uuid::now_v7()))
    }

    /// Whether this id is a temporary local-echo id.
    #[must_use]
    pub fn is_local_echo(&self) -> bool {
        self.0.starts_with(LOCAL_ECHO_PREFIX)
    }
}

/// The event type, as named by the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// `m.room.message`
    Message,
    /// `m.reaction`
    Reaction,
    /// `m.room.member`
    Membership,
    /// `m.room.redaction`
    Redaction,
    /// Any other event type, kept verbatim.
    Other(String),
}

impl EventKind {
    /// The protocol type string for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "m.room.message",
            Self::Reaction => "m.reaction",
            Self::Membership => "m.room.member",
            Self::Redaction => "m.room.redaction",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "m.room.message" => Self::Message,
            "m.reaction" => Self::Reaction,
            "m.room.member" => Self::Membership,
            "m.room.redaction" => Self::Redaction,
            _ => Self::Other(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server confirmation state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfirmationStatus {
    /// Local echo awaiting server confirmation.
    Pending,
    /// Confirmed by the server.
    Sent,
    /// The server rejected the event or sending failed.
    Error,
}

impl std::fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One entry of a room's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event id; temporary (see [`EventId::is_local_echo`]) until confirmed.
    pub id: EventId,
    /// The user who sent the event.
    pub sender: UserId,
    /// The room the event belongs to.
    pub room_id: RoomId,
    /// The event type.
    pub kind: EventKind,
    /// Opaque payload.
    pub content: Content,
    /// Server confirmation state.
    pub status: ConfirmationStatus,
    /// Set once the event has been redacted; `content` is then empty.
    pub redacted: bool,
    /// Origin timestamp in milliseconds since the UNIX epoch.
    pub origin_ts: u64,
    /// For redaction events, the event being redacted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<EventId>,
}

impl Event {
    /// Builds a confirmed `m.room.message` event with a `msgtype` and `body`.
    pub fn message(
        id: impl Into<EventId>,
        room_id: impl Into<RoomId>,
        sender: impl Into<UserId>,
        msgtype: &str,
        body: &str,
        origin_ts: u64,
    ) -> Self {
        let mut content = Content::new();
        content.insert("msgtype".into(), Value::String(msgtype.to_owned()));
        content.insert("body".into(), Value::String(body.to_owned()));
        Self {
            id: id.into(),
            sender: sender.into(),
            room_id: room_id.into(),
            kind: EventKind::Message,
            content,
            status: ConfirmationStatus::Sent,
            redacted: false,
            origin_ts,
            redacts: None,
        }
    }

    /// Builds a confirmed `m.reaction` annotating `target` with `key`.
    pub fn reaction(
        id: impl Into<EventId>,
        room_id: impl Into<RoomId>,
        sender: impl Into<UserId>,
        target: &EventId,
        key: &str,
        origin_ts: u64,
    ) -> Self {
        let mut relates_to = Map::new();
        relates_to.insert("rel_type".into(), Value::String("m.annotation".into()));
        relates_to.insert("event_id".into(), Value::String(target.as_str().to_owned()));
        relates_to.insert("key".into(), Value::String(key.to_owned()));
        let mut content = Content::new();
        content.insert("m.relates_to".into(), Value::Object(relates_to));
        Self {
            id: id.into(),
            sender: sender.into(),
            room_id: room_id.into(),
            kind: EventKind::Reaction,
            content,
            status: ConfirmationStatus::Sent,
            redacted: false,
            origin_ts,
            redacts: None,
        }
    }

    /// Builds a confirmed `m.room.redaction` event targeting `target`.
    pub fn redaction(
        id: impl Into<EventId>,
        room_id: impl Into<RoomId>,
        sender: impl Into<UserId>,
        target: EventId,
        origin_ts: u64,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            room_id: room_id.into(),
            kind: EventKind::Redaction,
            content: Content::new(),
            status: ConfirmationStatus::Sent,
            redacted: false,
            origin_ts,
            redacts: Some(target),
        }
    }

    /// Marks this event as a pending local echo.
    #[must_use]
    pub fn pending(mut self) -> Self {
        self.status = ConfirmationStatus::Pending;
        self
    }

    /// Whether the event is a local echo still awaiting confirmation.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ConfirmationStatus::Pending
    }

    /// The message subtype (`m.text`, `m.image`, ...), if any.
    #[must_use]
    pub fn msgtype(&self) -> Option<&str> {
        self.content.get("msgtype").and_then(Value::as_str)
    }

    /// The plain-text body, if any.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.content.get("body").and_then(Value::as_str)
    }

    /// The event this one relates to (`m.relates_to.event_id`), if any.
    #[must_use]
    pub fn relates_to(&self) -> Option<EventId> {
        self.content
            .get("m.relates_to")
            .and_then(|rel| rel.get("event_id"))
            .and_then(Value::as_str)
            .map(EventId::from)
    }

    /// The annotation key of a reaction, if any.
    #[must_use]
    pub fn reaction_key(&self) -> Option<&str> {
        self.content
            .get("m.relates_to")
            .and_then(|rel| rel.get("key"))
            .and_then(Value::as_str)
    }

    /// Clears the content and flags the event as redacted.
    pub fn redact(&mut self) {
        self.content.clear();
        self.redacted = true;
    }
}
