//! Read-receipt reconciliation.
//!
//! After the window settles, the newest event is compared against what the
//! server already knows. A receipt is sent at most once per distinct newest
//! confirmed event: never for a local echo, never twice for the same id, and
//! never while one for that id is still in flight. Failures are not retried
//! here; the next reconciliation pass picks them up naturally.

use std::collections::HashMap;

use roomview_proto::event::{ConfirmationStatus, Event, EventId, RoomId, UserId};

use crate::rooms::RoomSyncState;
use crate::service::{EventLogService, ServiceError};

/// Errors from sending a read receipt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiptError {
    /// The service rejected the receipt.
    #[error("read receipt for {event_id} in {room_id} failed: {source}")]
    ReceiptSendFailure {
        /// Room the receipt was for.
        room_id: RoomId,
        /// Event the receipt pointed at.
        event_id: EventId,
        /// Underlying service error.
        source: ServiceError,
    },
}

/// Why a reconciliation pass sent nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The window holds no events.
    EmptyWindow,
    /// The newest event is a local echo that is not confirmed.
    Unconfirmed,
    /// A receipt for this event was already sent this session.
    AlreadySent,
    /// The server's read marker already points at this event.
    AlreadyRead,
    /// A receipt for this event is still in flight.
    InFlight,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptDecision {
    /// Send a receipt for this event.
    Send(Event),
    /// Nothing to send.
    Skip(SkipReason),
}

/// Tracks in-flight receipts and decides when a new one is due.
#[derive(Debug)]
pub struct ReadReceiptTracker {
    local_user: UserId,
    in_flight: HashMap<RoomId, EventId>,
}

impl ReadReceiptTracker {
    /// Creates a tracker acting for `local_user`.
    #[must_use]
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            in_flight: HashMap::new(),
        }
    }

    /// Pure decision for one pass.
    ///
    /// `remote_marker` is where the server's read marker for the local user
    /// currently points.
    #[must_use]
    pub fn decide(
        &self,
        room_id: &RoomId,
        last: Option<&Event>,
        state: &RoomSyncState,
        remote_marker: Option<&EventId>,
    ) -> ReceiptDecision {
        let Some(last) = last else {
            return ReceiptDecision::Skip(SkipReason::EmptyWindow);
        };
        if last.status != ConfirmationStatus::Sent || last.id.is_local_echo() {
            return ReceiptDecision::Skip(SkipReason::Unconfirmed);
        }
        if state.last_receipt_sent() == Some(&last.id) {
            return ReceiptDecision::Skip(SkipReason::AlreadySent);
        }
        if remote_marker == Some(&last.id) {
            return ReceiptDecision::Skip(SkipReason::AlreadyRead);
        }
        if self.in_flight.get(room_id) == Some(&last.id) {
            return ReceiptDecision::Skip(SkipReason::InFlight);
        }
        ReceiptDecision::Send(last.clone())
    }

    /// Runs a pass against `service` and, when a receipt is due, marks it
    /// in flight. The caller must send it and report back with
    /// [`finish`](Self::finish).
    pub fn reconcile<S: EventLogService>(
        &mut self,
        service: &S,
        room_id: &RoomId,
        last: Option<&Event>,
        state: &RoomSyncState,
    ) -> ReceiptDecision {
        let remote = service.read_up_to(room_id, &self.local_user);
        let decision = self.decide(room_id, last, state, remote.as_ref());
        match &decision {
            ReceiptDecision::Send(event) => {
                self.in_flight.insert(room_id.clone(), event.id.clone());
            }
            ReceiptDecision::Skip(reason) => {
                tracing::trace!(room_id = %room_id, ?reason, "no read receipt due");
            }
        }
        decision
    }

    /// Clears the in-flight entry for `event_id`, if it is still the one
    /// tracked for `room_id`.
    pub fn finish(&mut self, room_id: &RoomId, event_id: &EventId) {
        if self.in_flight.get(room_id) == Some(event_id) {
            self.in_flight.remove(room_id);
        }
    }

    /// Whether a receipt is in flight for `room_id`.
    #[must_use]
    pub fn is_in_flight(&self, room_id: &RoomId) -> bool {
        self.in_flight.contains_key(room_id)
    }
}

/// Moves the read marker, sends the receipt and clears the unread counters.
///
/// A rejected read marker is logged and does not stop the receipt.
///
/// # Errors
///
/// Returns [`ReceiptError::ReceiptSendFailure`] if the receipt itself is
/// rejected; unread counters are left untouched in that case.
pub async fn send_receipt<S: EventLogService>(
    service: &S,
    room_id: &RoomId,
    event: &Event,
) -> Result<(), ReceiptError> {
    if let Err(e) = service.set_read_marker(room_id, &event.id).await {
        tracing::warn!(room_id = %room_id, event_id = %event.id, error = %e, "failed to move read marker");
    }
    service
        .send_read_receipt(room_id, event)
        .await
        .map_err(|source| ReceiptError::ReceiptSendFailure {
            room_id: room_id.clone(),
            event_id: event.id.clone(),
            source,
        })?;
    service.reset_unread_counts(room_id);
    tracing::debug!(room_id = %room_id, event_id = %event.id, "read receipt sent");
    Ok(())
}
