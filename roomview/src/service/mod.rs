//! Event log service abstraction.
//!
//! Defines the [`EventLogService`] trait the timeline engine consumes: room
//! join, snapshots anchored at the live end, token-based pagination, push
//! subscriptions, read receipts and media download. Implementations:
//! - [`memory::InMemoryEventLog`]: in-process log for tests and the demo

pub mod memory;

use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;

use roomview_proto::event::{Event, EventId, RoomId, UserId};
use roomview_proto::pagination::{Cursor, Direction, PaginationToken};
use roomview_proto::push::{Push, PushKind};

/// Errors reported by an [`EventLogService`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The room does not exist or cannot be joined.
    #[error("room {0} is unavailable")]
    RoomUnavailable(RoomId),

    /// A pagination token was not issued for this room or direction.
    #[error("invalid pagination token: {0}")]
    InvalidToken(String),

    /// The request failed in transit or was rejected by the server.
    #[error("request failed: {0}")]
    Request(String),

    /// No media is stored under the requested URI.
    #[error("media not found: {0}")]
    MediaNotFound(MediaUri),
}

/// The initial view of a room, anchored at the live end of its log.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The newest events, oldest first.
    pub events: Vec<Event>,
    /// Cursor for fetching older events.
    pub backward: Cursor,
    /// Cursor for fetching newer events.
    pub forward: Cursor,
}

/// One page of pagination results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Fetched events in chronological order (oldest first).
    pub events: Vec<Event>,
    /// Where the next request in the same direction resumes.
    pub next: Cursor,
}

/// Identifier of a push registration, used to deregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a raw registration number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// An ordered stream of pushes for a set of [`PushKind`]s.
///
/// Pushes of every subscribed kind arrive on one channel, in the order the
/// service emitted them.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Push>,
}

impl Subscription {
    /// Wrap the receiving side of a registration.
    #[must_use]
    pub const fn new(id: SubscriptionId, rx: mpsc::UnboundedReceiver<Push>) -> Self {
        Self { id, rx }
    }

    /// The registration id to pass to [`EventLogService::unsubscribe`].
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next push. Returns `None` once deregistered.
    pub async fn recv(&mut self) -> Option<Push> {
        self.rx.recv().await
    }
}

/// Location of a media blob (image, audio, PDF, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaUri(String);

impl MediaUri {
    /// Wrap a media URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Return the URI string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The event log service contract consumed by the timeline engine.
///
/// Async methods represent network round trips. Synchronous methods answer
/// from client-side state the service already holds.
pub trait EventLogService: Send + Sync {
    /// Whether the local user has already joined `room`.
    fn is_joined(&self, room: &RoomId) -> bool;

    /// Join `room`. Fails with [`ServiceError::RoomUnavailable`] when the
    /// room cannot be joined.
    fn join(&self, room: &RoomId) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// The newest `limit` events of `room` plus both pagination cursors.
    fn room_snapshot(
        &self,
        room: &RoomId,
        limit: usize,
    ) -> impl Future<Output = Result<Snapshot, ServiceError>> + Send;

    /// Fetch up to `count` events from `token` in `direction`.
    fn paginate(
        &self,
        room: &RoomId,
        token: &PaginationToken,
        direction: Direction,
        count: usize,
    ) -> impl Future<Output = Result<Page, ServiceError>> + Send;

    /// Register for pushes of the given kinds, delivered in emission order.
    fn subscribe(&self, kinds: &[PushKind]) -> Subscription;

    /// Deregister a subscription; its stream ends.
    fn unsubscribe(&self, id: SubscriptionId);

    /// The event `user`'s read marker currently points at, if any.
    fn read_up_to(&self, room: &RoomId, user: &UserId) -> Option<EventId>;

    /// Move the local user's fully-read marker to `event`.
    fn set_read_marker(
        &self,
        room: &RoomId,
        event: &EventId,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Send a read receipt for `event`.
    fn send_read_receipt(
        &self,
        room: &RoomId,
        event: &Event,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Zero the locally cached unread and highlight counters of `room`.
    fn reset_unread_counts(&self, room: &RoomId);

    /// Download the media stored at `uri`.
    fn fetch_media(
        &self,
        uri: &MediaUri,
    ) -> impl Future<Output = Result<Vec<u8>, ServiceError>> + Send;
}
