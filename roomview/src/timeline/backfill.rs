//! Scroll-driven backward pagination.
//!
//! The [`BackfillController`] decides, from the scroll geometry of the
//! message list, whether another batch of older events should be fetched.
//!
//! ```text
//!            evaluate: anchor near top, can paginate
//!   Idle ─────────────────────────────────────────────→ Loading
//!    ↑  ←── settled (after batch_finished(true)) ───────┘  │
//!    │  ←── batch_finished(false) ─────────────────────────┘
//!    │
//!    └── evaluate: fully scrolled or cursor exhausted ──→ Exhausted (terminal)
//! ```
//!
//! At most one batch is in flight at a time; `Exhausted` is never left for
//! the rest of the focus.

/// Scroll positions needed to decide whether to backfill.
///
/// Both values are in the same coordinate space (e.g. pixels from the top of
/// the page). The anchor is the element rendered above the oldest event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollGeometry {
    /// Top edge of the scroll container's visible area.
    pub container_top: f64,
    /// Top edge of the anchor element.
    pub anchor_top: f64,
}

impl ScrollGeometry {
    /// Whether the anchor is scrolled into view, within `threshold`.
    #[must_use]
    pub fn anchor_near_top(self, threshold: f64) -> bool {
        self.container_top - threshold < self.anchor_top
    }
}

/// Source of the current scroll geometry.
pub trait ScrollViewport: Send + Sync {
    /// The current geometry of the message list.
    fn geometry(&self) -> ScrollGeometry;
}

/// Lifecycle of backfill for the focused room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackfillState {
    /// Waiting for the anchor to come into view.
    #[default]
    Idle,
    /// A batch is in flight or has not settled yet.
    Loading,
    /// The start of the room has been reached.
    Exhausted,
}

/// What the caller should do after [`BackfillController::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillAction {
    /// Nothing to do right now.
    Wait,
    /// Fetch `count` older events.
    Fetch {
        /// Batch size.
        count: usize,
    },
    /// The cursor just ran out; record the room as fully scrolled.
    MarkExhausted,
}

/// Backfill state machine for one focus.
#[derive(Debug, Clone)]
pub struct BackfillController {
    state: BackfillState,
    batch_size: usize,
    threshold: f64,
}

impl BackfillController {
    /// Creates an idle controller.
    #[must_use]
    pub const fn new(batch_size: usize, threshold: f64) -> Self {
        Self {
            state: BackfillState::Idle,
            batch_size,
            threshold,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> BackfillState {
        self.state
    }

    /// Starts over for a new focus. A room already known to be fully
    /// scrolled starts out exhausted.
    pub const fn reset(&mut self, fully_scrolled: bool) {
        self.state = if fully_scrolled {
            BackfillState::Exhausted
        } else {
            BackfillState::Idle
        };
    }

    /// Decides the next step from the current scroll geometry.
    pub fn evaluate(
        &mut self,
        geometry: ScrollGeometry,
        fully_scrolled: bool,
        can_paginate: bool,
    ) -> BackfillAction {
        match self.state {
            BackfillState::Exhausted | BackfillState::Loading => BackfillAction::Wait,
            BackfillState::Idle if fully_scrolled => {
                self.state = BackfillState::Exhausted;
                BackfillAction::Wait
            }
            BackfillState::Idle if !geometry.anchor_near_top(self.threshold) => {
                BackfillAction::Wait
            }
            BackfillState::Idle if !can_paginate => {
                self.state = BackfillState::Exhausted;
                BackfillAction::MarkExhausted
            }
            BackfillState::Idle => {
                self.state = BackfillState::Loading;
                BackfillAction::Fetch {
                    count: self.batch_size,
                }
            }
        }
    }

    /// Records the end of a batch. A failed batch returns to idle right
    /// away so that the next scroll can retry; a successful one stays
    /// loading until [`settled`](Self::settled).
    pub fn batch_finished(&mut self, ok: bool) {
        if !ok && self.state == BackfillState::Loading {
            self.state = BackfillState::Idle;
        }
    }

    /// The layout has settled after a batch; evaluation may resume.
    pub fn settled(&mut self) {
        if self.state == BackfillState::Loading {
            self.state = BackfillState::Idle;
        }
    }
}
