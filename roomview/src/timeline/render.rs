//! Projection of a window snapshot into display items.
//!
//! Everything here is pure and recomputed per render; nothing is cached
//! between snapshots.

use std::collections::HashMap;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};

use roomview_proto::event::{Event, EventId, EventKind, UserId};

/// Message subtypes that render as message items.
pub const SUPPORTED_MSGTYPES: [&str; 7] = [
    "m.text", "m.notice", "m.emote", "m.file", "m.image", "m.video", "m.audio",
];

/// One row of the rendered timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineItem {
    /// Starts a run of consecutive events from one sender.
    SenderHeader {
        /// The sender of the run.
        sender: UserId,
        /// Whether the sender is the local user.
        is_me: bool,
    },
    /// A message with its reactions.
    Message {
        /// The message event.
        event: Event,
        /// Reactions annotating this message, in window order.
        reactions: Vec<Event>,
        /// The event this message replies to, if any.
        in_reply_to: Option<EventId>,
    },
    /// One or more consecutive redacted messages from one sender.
    Redacted {
        /// Id of the first redacted event in the run.
        first_id: EventId,
        /// Sender of the redacted events.
        sender: UserId,
        /// Whether the sender is the local user.
        is_me: bool,
        /// Number of redacted events collapsed into this item.
        count: usize,
    },
}

/// Marker rendered above the oldest loaded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorMarker {
    /// More history may still be fetched.
    Loading,
    /// The start of the room has been reached.
    AllLoaded,
}

impl AnchorMarker {
    /// The marker for a room's scroll state.
    #[must_use]
    pub const fn for_room(fully_scrolled: bool) -> Self {
        if fully_scrolled {
            Self::AllLoaded
        } else {
            Self::Loading
        }
    }

    /// Display copy.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Loading => "loading...",
            Self::AllLoaded => "All messages loaded",
        }
    }
}

/// Whether `event` becomes a message or placeholder item.
#[must_use]
pub fn is_renderable(event: &Event) -> bool {
    event.kind == EventKind::Message
        && (event.redacted
            || event.content.is_empty()
            || event
                .msgtype()
                .is_some_and(|t| SUPPORTED_MSGTYPES.contains(&t)))
}

/// Reactions in `events`, keyed by the event they annotate.
#[must_use]
pub fn group_reactions(events: &[Event]) -> HashMap<EventId, Vec<Event>> {
    let mut grouped: HashMap<EventId, Vec<Event>> = HashMap::new();
    for event in events
        .iter()
        .filter(|e| e.kind == EventKind::Reaction && !e.redacted)
    {
        if let Some(target) = event.relates_to() {
            grouped.entry(target).or_default().push(event.clone());
        }
    }
    grouped
}

/// Reaction keys with their counts, in first-seen order.
#[must_use]
pub fn reaction_counts(reactions: &[Event]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for key in reactions.iter().filter_map(Event::reaction_key) {
        match counts.iter_mut().find(|(k, _)| k == key) {
            Some((_, n)) => *n += 1,
            None => counts.push((key.to_owned(), 1)),
        }
    }
    counts
}

/// Builds the display items for a window snapshot.
///
/// A sender header precedes every change of sender. A redacted event whose
/// preceding item is a placeholder from the same sender increments that
/// placeholder instead of adding a new one.
#[must_use]
pub fn render_items(events: &[Event], local_user: &UserId) -> Vec<TimelineItem> {
    let mut reactions = group_reactions(events);
    let mut items = Vec::new();
    let mut current_sender: Option<&UserId> = None;

    for event in events.iter().filter(|e| is_renderable(e)) {
        let is_me = event.sender == *local_user;
        if current_sender != Some(&event.sender) {
            items.push(TimelineItem::SenderHeader {
                sender: event.sender.clone(),
                is_me,
            });
            current_sender = Some(&event.sender);
        }

        if event.redacted || event.content.is_empty() {
            if let Some(TimelineItem::Redacted { sender, count, .. }) = items.last_mut() {
                if *sender == event.sender {
                    *count += 1;
                    continue;
                }
            }
            items.push(TimelineItem::Redacted {
                first_id: event.id.clone(),
                sender: event.sender.clone(),
                is_me,
                count: 1,
            });
        } else {
            items.push(TimelineItem::Message {
                event: event.clone(),
                reactions: reactions.remove(&event.id).unwrap_or_default(),
                in_reply_to: in_reply_to(event),
            });
        }
    }
    items
}

/// Label of a redaction placeholder.
#[must_use]
pub fn redacted_label(count: usize) -> String {
    if count > 1 {
        format!("{count} messages deleted")
    } else {
        "message deleted".to_owned()
    }
}

/// Whether `format` is a valid strftime string.
#[must_use]
pub fn is_valid_timestamp_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Formats an origin timestamp in local time.
///
/// Out-of-range timestamps and invalid formats yield an empty string.
#[must_use]
pub fn format_timestamp(origin_ts: u64, format: &str) -> String {
    if !is_valid_timestamp_format(format) {
        return String::new();
    }
    i64::try_from(origin_ts)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|utc| utc.with_timezone(&Local).format(format).to_string())
        .unwrap_or_default()
}

fn in_reply_to(event: &Event) -> Option<EventId> {
    event
        .content
        .get("m.relates_to")?
        .get("m.in_reply_to")?
        .get("event_id")?
        .as_str()
        .map(EventId::from)
}
