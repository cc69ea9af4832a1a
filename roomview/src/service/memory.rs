//! In-process event log service.
//!
//! [`InMemoryEventLog`] keeps the true log of every room in memory and
//! implements [`EventLogService`] on top of it. Pagination tokens are opaque
//! strings encoding a log position (`b:<pos>` for backward, `f:<pos>` for
//! forward). Besides the service contract it exposes the operations a test
//! or demo needs to drive the log: appending remote events, sending and
//! confirming local echoes, redacting, typing pushes, and failure/latency
//! injection for pagination, receipts and media.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use roomview_proto::event::{ConfirmationStatus, Content, Event, EventId, EventKind, RoomId, UserId};
use roomview_proto::pagination::{Cursor, Direction, PaginationToken};
use roomview_proto::push::{Push, PushKind};
use roomview_proto::typing::TypingUpdate;

use super::{EventLogService, MediaUri, Page, ServiceError, Snapshot, Subscription, SubscriptionId};

/// Unread notification counters of a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnreadCounts {
    /// Total unread notifications.
    pub total: u64,
    /// Unread highlights (mentions).
    pub highlight: u64,
}

#[derive(Debug, Default)]
struct RoomLog {
    events: Vec<Event>,
    read_markers: HashMap<UserId, EventId>,
    unread: UnreadCounts,
}

impl RoomLog {
    fn position(&self, id: &EventId) -> Option<usize> {
        self.events.iter().position(|e| e.id == *id)
    }

    fn next_event_id(&self) -> EventId {
        EventId::new(format!("${}", self.events.len() + 1))
    }
}

#[derive(Debug, Default)]
struct LogState {
    rooms: HashMap<RoomId, RoomLog>,
    joined: HashSet<RoomId>,
    unavailable: HashSet<RoomId>,
    receipts_sent: Vec<(RoomId, EventId)>,
    markers_sent: Vec<(RoomId, EventId)>,
    fail_receipts: bool,
    failing_paginations: usize,
    panicking_paginations: usize,
    pagination_delays: VecDeque<Duration>,
    pagination_calls: usize,
    media: HashMap<MediaUri, Vec<u8>>,
    media_delay: Option<Duration>,
    media_fetches: usize,
}

impl LogState {
    fn room(&self, room: &RoomId) -> Result<&RoomLog, ServiceError> {
        if self.unavailable.contains(room) {
            return Err(ServiceError::RoomUnavailable(room.clone()));
        }
        self.rooms
            .get(room)
            .ok_or_else(|| ServiceError::RoomUnavailable(room.clone()))
    }
}

type Subscriber = (Vec<PushKind>, mpsc::UnboundedSender<Push>);

/// An [`EventLogService`] backed by in-memory room logs.
pub struct InMemoryEventLog {
    local_user: UserId,
    state: Mutex<LogState>,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    next_subscription: AtomicU64,
}

impl InMemoryEventLog {
    /// Creates an empty log on behalf of `local_user`.
    #[must_use]
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            state: Mutex::new(LogState::default()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// The user this log acts for (sender of local echoes, owner of receipts).
    #[must_use]
    pub const fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Creates `room` if it does not exist yet.
    pub fn create_room(&self, room: &RoomId) {
        self.state.lock().rooms.entry(room.clone()).or_default();
    }

    /// Makes `room` impossible to join or load.
    pub fn mark_unavailable(&self, room: &RoomId) {
        self.state.lock().unavailable.insert(room.clone());
    }

    /// Appends `count` text messages from `sender` without emitting pushes.
    ///
    /// Returns the ids of the new events, oldest first.
    pub fn seed_messages(&self, room: &RoomId, sender: &UserId, count: usize) -> Vec<EventId> {
        let mut state = self.state.lock();
        let log = state.rooms.entry(room.clone()).or_default();
        (0..count)
            .map(|_| {
                let id = log.next_event_id();
                let body = format!("message {}", log.events.len() + 1);
                log.events.push(Event::message(
                    id.clone(),
                    room.clone(),
                    sender.clone(),
                    "m.text",
                    &body,
                    now_millis(),
                ));
                id
            })
            .collect()
    }

    /// Appends a remote event to the live end and pushes it.
    pub fn append(&self, mut event: Event) -> EventId {
        let room = event.room_id.clone();
        {
            let mut state = self.state.lock();
            let log = state.rooms.entry(room).or_default();
            if event.id.as_str().is_empty() {
                event.id = log.next_event_id();
            }
            if event.sender != self.local_user {
                log.unread.total += 1;
            }
            log.events.push(event.clone());
        }
        let id = event.id.clone();
        self.publish(&Push::NewEvent { event });
        id
    }

    /// Appends a text message from `sender` to the live end and pushes it.
    pub fn append_message(&self, room: &RoomId, sender: &UserId, body: &str) -> EventId {
        self.append(Event::message(
            "",
            room.clone(),
            sender.clone(),
            "m.text",
            body,
            now_millis(),
        ))
    }

    /// Sends a text message as a pending local echo.
    ///
    /// The echo enters the log with a temporary id and is pushed as a new
    /// event. Returns the temporary id.
    pub fn send_local_echo(&self, room: &RoomId, body: &str) -> EventId {
        let mut content = Content::new();
        content.insert("msgtype".into(), json!("m.text"));
        content.insert("body".into(), json!(body));
        let event = Event {
            id: EventId::local_echo(),
            sender: self.local_user.clone(),
            room_id: room.clone(),
            kind: EventKind::Message,
            content,
            status: ConfirmationStatus::Pending,
            redacted: false,
            origin_ts: now_millis(),
            redacts: None,
        };
        self.append(event)
    }

    /// Confirms a pending echo: assigns its canonical id and marks it sent.
    ///
    /// Returns the canonical id, or `None` if the echo is unknown.
    pub fn confirm_local_echo(&self, room: &RoomId, echo_id: &EventId) -> Option<EventId> {
        let canonical = EventId::new(format!("${}", Uuid::now_v7().simple()));
        let event = {
            let mut state = self.state.lock();
            let log = state.rooms.get_mut(room)?;
            let pos = log.position(echo_id)?;
            let slot = &mut log.events[pos];
            slot.id = canonical.clone();
            slot.status = ConfirmationStatus::Sent;
            slot.clone()
        };
        self.publish(&Push::LocalEchoUpdated {
            event,
            previous_id: echo_id.clone(),
        });
        Some(canonical)
    }

    /// Marks a pending echo as failed. Returns `false` if the echo is unknown.
    pub fn fail_local_echo(&self, room: &RoomId, echo_id: &EventId) -> bool {
        let event = {
            let mut state = self.state.lock();
            let Some(log) = state.rooms.get_mut(room) else {
                return false;
            };
            let Some(pos) = log.position(echo_id) else {
                return false;
            };
            log.events[pos].status = ConfirmationStatus::Error;
            log.events[pos].clone()
        };
        self.publish(&Push::LocalEchoUpdated {
            event,
            previous_id: echo_id.clone(),
        });
        true
    }

    /// Redacts `target` on behalf of `by`.
    ///
    /// The target is cleared in the log, a redaction event is appended and
    /// pushed. Returns the redaction event id, or `None` if the target is
    /// unknown.
    pub fn redact(&self, room: &RoomId, target: &EventId, by: &UserId) -> Option<EventId> {
        let redaction = {
            let mut state = self.state.lock();
            let log = state.rooms.get_mut(room)?;
            let pos = log.position(target)?;
            log.events[pos].redact();
            let id = log.next_event_id();
            let redaction = Event::redaction(id, room.clone(), by.clone(), target.clone(), now_millis());
            log.events.push(redaction.clone());
            redaction
        };
        let id = redaction.id.clone();
        self.publish(&Push::NewEvent { event: redaction });
        Some(id)
    }

    /// Pushes a typing snapshot for `room`.
    pub fn set_typing(&self, room: &RoomId, user_ids: Vec<UserId>) {
        self.publish(&Push::Typing(TypingUpdate {
            room_id: room.clone(),
            user_ids,
        }));
    }

    /// Moves `user`'s read marker in `room` to `event`.
    pub fn set_read_up_to(&self, room: &RoomId, user: &UserId, event: &EventId) {
        let mut state = self.state.lock();
        let log = state.rooms.entry(room.clone()).or_default();
        log.read_markers.insert(user.clone(), event.clone());
    }

    /// Overwrites the unread counters of `room`.
    pub fn set_unread_counts(&self, room: &RoomId, counts: UnreadCounts) {
        self.state.lock().rooms.entry(room.clone()).or_default().unread = counts;
    }

    /// Current unread counters of `room`.
    #[must_use]
    pub fn unread_counts(&self, room: &RoomId) -> UnreadCounts {
        self.state
            .lock()
            .rooms
            .get(room)
            .map(|log| log.unread)
            .unwrap_or_default()
    }

    /// The true log of `room`, oldest first.
    #[must_use]
    pub fn log(&self, room: &RoomId) -> Vec<Event> {
        self.state
            .lock()
            .rooms
            .get(room)
            .map(|log| log.events.clone())
            .unwrap_or_default()
    }

    /// Every read receipt sent successfully, in order.
    #[must_use]
    pub fn receipts_sent(&self) -> Vec<(RoomId, EventId)> {
        self.state.lock().receipts_sent.clone()
    }

    /// Every read marker set successfully, in order.
    #[must_use]
    pub fn read_markers_sent(&self) -> Vec<(RoomId, EventId)> {
        self.state.lock().markers_sent.clone()
    }

    /// Makes receipt and read-marker requests fail while `fail` is set.
    pub fn fail_receipts(&self, fail: bool) {
        self.state.lock().fail_receipts = fail;
    }

    /// Makes the next `count` pagination requests fail.
    pub fn fail_next_paginations(&self, count: usize) {
        self.state.lock().failing_paginations = count;
    }

    /// Makes the next `count` pagination requests panic instead of
    /// returning.
    pub fn panic_next_paginations(&self, count: usize) {
        self.state.lock().panicking_paginations = count;
    }

    /// Delays the next pagination requests, one delay per request.
    pub fn delay_next_paginations(&self, delays: impl IntoIterator<Item = Duration>) {
        self.state.lock().pagination_delays.extend(delays);
    }

    /// Number of pagination requests received so far.
    #[must_use]
    pub fn pagination_calls(&self) -> usize {
        self.state.lock().pagination_calls
    }

    /// Stores a media blob under `uri`.
    pub fn put_media(&self, uri: MediaUri, bytes: Vec<u8>) {
        self.state.lock().media.insert(uri, bytes);
    }

    /// Delays every media download by `delay`.
    pub fn delay_media(&self, delay: Duration) {
        self.state.lock().media_delay = Some(delay);
    }

    /// Number of media downloads served so far.
    #[must_use]
    pub fn media_fetches(&self) -> usize {
        self.state.lock().media_fetches
    }

    /// Number of live push registrations.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn publish(&self, push: &Push) {
        let kind = push.kind();
        self.subscribers.lock().retain(|id, (kinds, tx)| {
            if !kinds.contains(&kind) {
                return true;
            }
            let delivered = tx.send(push.clone()).is_ok();
            if !delivered {
                tracing::debug!(subscription = %id, "dropping closed subscription");
            }
            delivered
        });
    }
}

impl EventLogService for InMemoryEventLog {
    fn is_joined(&self, room: &RoomId) -> bool {
        self.state.lock().joined.contains(room)
    }

    async fn join(&self, room: &RoomId) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        state.room(room)?;
        state.joined.insert(room.clone());
        Ok(())
    }

    async fn room_snapshot(&self, room: &RoomId, limit: usize) -> Result<Snapshot, ServiceError> {
        let state = self.state.lock();
        let log = state.room(room)?;
        let len = log.events.len();
        let start = len.saturating_sub(limit);
        Ok(Snapshot {
            events: log.events[start..].to_vec(),
            backward: backward_cursor(start),
            forward: Cursor::Token(PaginationToken::new(format!("f:{len}"))),
        })
    }

    async fn paginate(
        &self,
        room: &RoomId,
        token: &PaginationToken,
        direction: Direction,
        count: usize,
    ) -> Result<Page, ServiceError> {
        let (delay, fail, explode) = {
            let mut state = self.state.lock();
            state.pagination_calls += 1;
            let fail = state.failing_paginations > 0;
            if fail {
                state.failing_paginations -= 1;
            }
            let explode = state.panicking_paginations > 0;
            if explode {
                state.panicking_paginations -= 1;
            }
            (state.pagination_delays.pop_front(), fail, explode)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        assert!(!explode, "injected pagination panic");
        if fail {
            return Err(ServiceError::Request("pagination request failed".into()));
        }

        let state = self.state.lock();
        let log = state.room(room)?;
        let len = log.events.len();
        let pos = parse_token(token, direction)?.min(len);
        let page = match direction {
            Direction::Backward => {
                let start = pos.saturating_sub(count);
                Page {
                    events: log.events[start..pos].to_vec(),
                    next: backward_cursor(start),
                }
            }
            Direction::Forward => {
                let end = pos.saturating_add(count).min(len);
                Page {
                    events: log.events[pos..end].to_vec(),
                    next: Cursor::Token(PaginationToken::new(format!("f:{end}"))),
                }
            }
        };
        Ok(page)
    }

    fn subscribe(&self, kinds: &[PushKind]) -> Subscription {
        let id = SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(id, (kinds.to_vec(), tx));
        Subscription::new(id, rx)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().remove(&id);
    }

    fn read_up_to(&self, room: &RoomId, user: &UserId) -> Option<EventId> {
        self.state
            .lock()
            .rooms
            .get(room)
            .and_then(|log| log.read_markers.get(user).cloned())
    }

    async fn set_read_marker(&self, room: &RoomId, event: &EventId) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        if state.fail_receipts {
            return Err(ServiceError::Request("read marker rejected".into()));
        }
        state.markers_sent.push((room.clone(), event.clone()));
        Ok(())
    }

    async fn send_read_receipt(&self, room: &RoomId, event: &Event) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        if state.fail_receipts {
            return Err(ServiceError::Request("read receipt rejected".into()));
        }
        state.receipts_sent.push((room.clone(), event.id.clone()));
        let local_user = self.local_user.clone();
        if let Some(log) = state.rooms.get_mut(room) {
            log.read_markers.insert(local_user, event.id.clone());
        }
        Ok(())
    }

    fn reset_unread_counts(&self, room: &RoomId) {
        if let Some(log) = self.state.lock().rooms.get_mut(room) {
            log.unread = UnreadCounts::default();
        }
    }

    async fn fetch_media(&self, uri: &MediaUri) -> Result<Vec<u8>, ServiceError> {
        let delay = {
            let mut state = self.state.lock();
            state.media_fetches += 1;
            state.media_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .media
            .get(uri)
            .cloned()
            .ok_or_else(|| ServiceError::MediaNotFound(uri.clone()))
    }
}

fn backward_cursor(start: usize) -> Cursor {
    if start == 0 {
        Cursor::Exhausted
    } else {
        Cursor::Token(PaginationToken::new(format!("b:{start}")))
    }
}

fn parse_token(token: &PaginationToken, direction: Direction) -> Result<usize, ServiceError> {
    let prefix = match direction {
        Direction::Backward => "b:",
        Direction::Forward => "f:",
    };
    token
        .as_str()
        .strip_prefix(prefix)
        .and_then(|pos| pos.parse().ok())
        .ok_or_else(|| ServiceError::InvalidToken(token.to_string()))
}

fn now_millis() -> u64 {
    u64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}
