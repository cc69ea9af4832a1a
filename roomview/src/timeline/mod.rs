//! Timeline window over one room's event log.
//!
//! Contains the [`TimelineWindow`], an ordered, deduplicated slice of a
//! room's log together with its forward and backward pagination cursors,
//! and the components that drive it:
//! - [`backfill`]: scroll-driven backward pagination state machine
//! - [`live`]: merges live pushes into the window
//! - [`receipts`]: read-receipt reconciliation
//! - [`typing`]: typing peers of the active room
//! - [`render`]: projection of the window into display items
//!
//! # Invariants
//!
//! 1. Events are unique by id and keep their arrival order.
//! 2. The window is a contiguous slice of the true log: backward pages are
//!    prepended, forward pages appended, each resuming from the cursor the
//!    window holds.
//! 3. Per direction, only the most recently issued pagination may apply its
//!    result. An older request that completes later is discarded.
//! 4. Redaction events never occupy a slot; they clear their target in place.

pub mod backfill;
pub mod live;
pub mod receipts;
pub mod render;
pub mod typing;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use roomview_proto::event::{Event, EventId, EventKind, RoomId};
use roomview_proto::pagination::{Cursor, Direction};

use crate::cancel::CapabilitySlot;
use crate::service::{EventLogService, ServiceError};

/// Errors produced by [`TimelineWindow`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    /// The room could not be joined or loaded. No window exists.
    #[error("room {room_id} is unavailable: {source}")]
    RoomUnavailable {
        /// The room that failed to load.
        room_id: RoomId,
        /// Underlying service error.
        source: ServiceError,
    },

    /// A pagination request failed. The window is unchanged.
    #[error("{direction} pagination failed: {source}")]
    PaginationFailure {
        /// Direction of the failed request.
        direction: Direction,
        /// Underlying service error.
        source: ServiceError,
    },
}

/// Result of a [`TimelineWindow::paginate`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum PaginateOutcome {
    /// The page was spliced into the window.
    Applied {
        /// Number of events that took new slots.
        added: usize,
        /// Number of events the service returned, redactions and
        /// duplicates included. Zero means the cursor has caught up.
        fetched: usize,
        /// Snapshot of the window after the splice.
        events: Vec<Event>,
    },
    /// A newer request in the same direction (or closing the window)
    /// invalidated this one; its result was discarded.
    Superseded,
}

/// Outcome of merging a local-echo update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMerge {
    /// The echo was updated in place.
    Replaced,
    /// The confirmed event was already present; the echo slot was removed.
    Collapsed,
    /// Neither the echo nor its confirmed form is in the window.
    NotInWindow,
}

#[derive(Debug)]
struct WindowState {
    events: Vec<Event>,
    backward: Cursor,
    forward: Cursor,
}

impl WindowState {
    const fn cursor(&self, direction: Direction) -> &Cursor {
        match direction {
            Direction::Backward => &self.backward,
            Direction::Forward => &self.forward,
        }
    }

    fn set_cursor(&mut self, direction: Direction, cursor: Cursor) {
        match direction {
            Direction::Backward => self.backward = cursor,
            Direction::Forward => self.forward = cursor,
        }
    }

    fn position(&self, id: &EventId) -> Option<usize> {
        self.events.iter().position(|e| e.id == *id)
    }

    /// Splices a chronological page at the given end. Returns the number of
    /// events that took new slots.
    fn splice(&mut self, direction: Direction, page: Vec<Event>) -> usize {
        let mut fresh: Vec<Event> = Vec::with_capacity(page.len());
        for mut event in page {
            if event.kind == EventKind::Redaction {
                if let Some(target) = event.redacts.as_ref() {
                    if let Some(slot) = fresh.iter_mut().find(|e| e.id == *target) {
                        slot.redact();
                    } else if let Some(pos) = self.position(target) {
                        self.events[pos].redact();
                    }
                }
                continue;
            }
            if let Some(pos) = self.position(&event.id) {
                if self.events[pos].redacted && !event.redacted {
                    event.redact();
                }
                self.events[pos] = event;
                continue;
            }
            if fresh.iter().any(|e| e.id == event.id) {
                continue;
            }
            fresh.push(event);
        }

        let added = fresh.len();
        match direction {
            Direction::Backward => {
                self.events.splice(0..0, fresh);
            }
            Direction::Forward => self.events.extend(fresh),
        }
        added
    }
}

/// An ordered, deduplicated window over one room's event log.
///
/// Shared between the components of a focus through `Arc`; every mutation
/// happens under a short lock that is never held across an await.
pub struct TimelineWindow<S> {
    room_id: RoomId,
    service: Arc<S>,
    state: Mutex<WindowState>,
    backward_requests: CapabilitySlot,
    forward_requests: CapabilitySlot,
    closed: AtomicBool,
}

impl<S: EventLogService> TimelineWindow<S> {
    /// Joins `room_id` if needed and loads the newest `initial_limit` events.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::RoomUnavailable`] if the room cannot be joined
    /// or its snapshot cannot be fetched. No partial window is produced.
    pub async fn load(
        service: Arc<S>,
        room_id: RoomId,
        initial_limit: usize,
    ) -> Result<Self, WindowError> {
        let unavailable = |source| WindowError::RoomUnavailable {
            room_id: room_id.clone(),
            source,
        };

        if !service.is_joined(&room_id) {
            tracing::debug!(room_id = %room_id, "joining room");
            service.join(&room_id).await.map_err(unavailable)?;
        }
        let snapshot = service
            .room_snapshot(&room_id, initial_limit)
            .await
            .map_err(unavailable)?;

        let mut state = WindowState {
            events: Vec::with_capacity(snapshot.events.len()),
            backward: snapshot.backward,
            forward: snapshot.forward,
        };
        state.splice(Direction::Forward, snapshot.events);
        tracing::debug!(
            room_id = %room_id,
            events = state.events.len(),
            can_backfill = !state.backward.is_exhausted(),
            "timeline window loaded"
        );

        Ok(Self {
            room_id,
            service,
            state: Mutex::new(state),
            backward_requests: CapabilitySlot::new(),
            forward_requests: CapabilitySlot::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// The room this window belongs to.
    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Fetches up to `count` events in `direction` and splices them in.
    ///
    /// Issuing a call supersedes any call in the same direction that is
    /// still in flight: only the latest request applies its result. When the
    /// cursor is already exhausted nothing is requested.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::PaginationFailure`] if the (still current)
    /// request failed. Superseded failures are reported as
    /// [`PaginateOutcome::Superseded`].
    pub async fn paginate(
        &self,
        direction: Direction,
        count: usize,
    ) -> Result<PaginateOutcome, WindowError> {
        let requests = self.requests(direction);
        let capability = requests.issue();
        let token = {
            let state = self.state.lock();
            match state.cursor(direction) {
                Cursor::Token(token) => token.clone(),
                Cursor::Exhausted => {
                    return Ok(PaginateOutcome::Applied {
                        added: 0,
                        fetched: 0,
                        events: state.events.clone(),
                    });
                }
            }
        };

        let page = self
            .service
            .paginate(&self.room_id, &token, direction, count)
            .await;

        if self.closed.load(Ordering::Acquire) || !requests.is_current(capability) {
            tracing::debug!(
                room_id = %self.room_id,
                %direction,
                "discarding superseded pagination result"
            );
            return Ok(PaginateOutcome::Superseded);
        }
        let page = page.map_err(|source| WindowError::PaginationFailure { direction, source })?;

        let mut state = self.state.lock();
        let fetched = page.events.len();
        let added = state.splice(direction, page.events);
        state.set_cursor(direction, page.next);
        tracing::trace!(room_id = %self.room_id, %direction, added, fetched, "pagination applied");
        Ok(PaginateOutcome::Applied {
            added,
            fetched,
            events: state.events.clone(),
        })
    }

    /// Whether more events can be fetched in `direction`.
    #[must_use]
    pub fn can_paginate(&self, direction: Direction) -> bool {
        !self.state.lock().cursor(direction).is_exhausted()
    }

    /// Snapshot of the window, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    /// The newest event in the window.
    #[must_use]
    pub fn last_event(&self) -> Option<Event> {
        self.state.lock().events.last().cloned()
    }

    /// Whether an event with `id` is in the window.
    #[must_use]
    pub fn contains(&self, id: &EventId) -> bool {
        self.state.lock().position(id).is_some()
    }

    /// Number of events in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Whether the window holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    /// Applies a local-echo transition in place.
    ///
    /// `previous_id` is the id the echo had in the window; `event` is its new
    /// form (possibly with a new canonical id and status).
    pub fn replace_echo(&self, previous_id: &EventId, event: Event) -> EchoMerge {
        let mut state = self.state.lock();
        let echo_pos = state.position(previous_id);
        let confirmed_pos = if event.id == *previous_id {
            echo_pos
        } else {
            state.position(&event.id)
        };

        match (echo_pos, confirmed_pos) {
            (Some(echo), Some(confirmed)) if echo != confirmed => {
                state.events.remove(echo);
                EchoMerge::Collapsed
            }
            (Some(pos), _) | (None, Some(pos)) => {
                state.events[pos] = event;
                EchoMerge::Replaced
            }
            (None, None) => EchoMerge::NotInWindow,
        }
    }

    /// Redacts `target` in place. Returns `false` if it is not in the window.
    pub fn redact(&self, target: &EventId) -> bool {
        let mut state = self.state.lock();
        match state.position(target) {
            Some(pos) => {
                state.events[pos].redact();
                true
            }
            None => false,
        }
    }

    /// Invalidates every in-flight pagination. Later results are discarded.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.backward_requests.revoke();
        self.forward_requests.revoke();
    }

    const fn requests(&self, direction: Direction) -> &CapabilitySlot {
        match direction {
            Direction::Backward => &self.backward_requests,
            Direction::Forward => &self.forward_requests,
        }
    }
}
