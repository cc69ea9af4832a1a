//! Live merge of pushed updates into the active window.
//!
//! A [`LiveMergeListener`] consumes one push [`Subscription`] for the
//! lifetime of a focus and applies each push to the window in the order it
//! was observed. New events (redactions included) go through the same path
//! as explicit pagination: one-event forward pages, repeated until the pushed
//! event is in the window or a page comes back empty. A redaction never takes
//! a slot, so its merge always ends on the empty page. Local-echo
//! transitions are rewritten in place.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use roomview_proto::pagination::Direction;
use roomview_proto::push::{Push, PushKind};

use super::{EchoMerge, PaginateOutcome, TimelineWindow, WindowError};
use crate::service::{EventLogService, Subscription};

/// Push kinds the listener subscribes to.
pub const LIVE_PUSH_KINDS: [PushKind; 2] = [PushKind::NewEvent, PushKind::LocalEchoUpdated];

/// Upper bound on one-event pages fetched for a single push. More than one
/// is needed only when an earlier push failed to merge.
const MAX_CATCH_UP: usize = 32;

/// Applies live pushes to a [`TimelineWindow`].
pub struct LiveMergeListener<S> {
    window: Arc<TimelineWindow<S>>,
}

impl<S: EventLogService> LiveMergeListener<S> {
    /// Creates a listener for `window`.
    #[must_use]
    pub const fn new(window: Arc<TimelineWindow<S>>) -> Self {
        Self { window }
    }

    /// Applies one push. Returns whether the window changed.
    ///
    /// # Errors
    ///
    /// Returns the [`WindowError`] of the forward pagination triggered by a
    /// new-event push.
    pub async fn handle(&self, push: &Push) -> Result<bool, WindowError> {
        if push.room_id() != self.window.room_id() {
            tracing::trace!(
                room_id = %push.room_id(),
                active = %self.window.room_id(),
                "ignoring push for inactive room"
            );
            return Ok(false);
        }

        match push {
            Push::NewEvent { event } => {
                tracing::trace!(event_id = %event.id, kind = %event.kind, "new event pushed");
                let mut changed = false;
                for _ in 0..MAX_CATCH_UP {
                    match self.window.paginate(Direction::Forward, 1).await? {
                        PaginateOutcome::Applied { fetched, .. } => {
                            changed = true;
                            if fetched == 0 || self.window.contains(&event.id) {
                                break;
                            }
                        }
                        PaginateOutcome::Superseded => break,
                    }
                }
                Ok(changed)
            }
            Push::LocalEchoUpdated { event, previous_id } => {
                tracing::debug!(
                    previous_id = %previous_id,
                    event_id = %event.id,
                    status = %event.status,
                    "local echo updated"
                );
                let merge = self.window.replace_echo(previous_id, event.clone());
                Ok(merge != EchoMerge::NotInWindow)
            }
            Push::Typing(_) => Ok(false),
        }
    }

    /// Drains `subscription` until it is closed, calling `on_change` after
    /// every push that changed the window.
    ///
    /// Handler errors and panics, including panics in `on_change`, are
    /// logged; the loop keeps running.
    pub async fn run<F>(self, mut subscription: Subscription, mut on_change: F)
    where
        F: FnMut() + Send,
    {
        let room_id = self.window.room_id().clone();
        while let Some(push) = subscription.recv().await {
            match AssertUnwindSafe(self.handle(&push)).catch_unwind().await {
                Ok(Ok(true)) => {
                    if std::panic::catch_unwind(AssertUnwindSafe(&mut on_change)).is_err() {
                        tracing::error!(room_id = %room_id, "change callback panicked");
                    }
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(room_id = %room_id, kind = ?push.kind(), error = %e, "failed to merge push");
                }
                Err(_) => {
                    tracing::error!(room_id = %room_id, kind = ?push.kind(), "push handler panicked");
                }
            }
        }
        tracing::debug!(room_id = %room_id, subscription = %subscription.id(), "live merge stopped");
    }
}
