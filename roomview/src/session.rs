//! Session loop wiring the timeline engine to a UI.
//!
//! [`spawn_session`] starts one background task that owns the
//! `FocusController` state: the active [`TimelineWindow`], its backfill
//! controller, the per-room [`RoomSyncRegistry`], the receipt tracker and the
//! typing tracker. The UI talks to it through a [`SessionHandle`].
//!
//! # Architecture
//!
//! ```text
//! UI ── SessionCommand ──→ session loop ←── SessionMsg ── spawned work
//!    ←── watch<TimelineView> ──┘     ↑                    (backfill batches,
//!                                    └── typing pushes      receipts, timers,
//!                                                           live merge)
//! ```
//!
//! Every piece of work spawned for a focus carries the capability that was
//! current when it started. The loop discards completions whose capability
//! has since been revoked, so nothing from a previous room can touch the
//! current one.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use roomview_proto::event::{Event, EventId, RoomId, UserId};
use roomview_proto::pagination::Direction;
use roomview_proto::push::{Push, PushKind};

use crate::cache::MediaCache;
use crate::cancel::{Capability, CapabilitySlot, DebounceTimer};
use crate::config::TimelineConfig;
use crate::rooms::RoomSyncRegistry;
use crate::service::{EventLogService, MediaUri, ServiceError, Subscription, SubscriptionId};
use crate::timeline::backfill::{
    BackfillAction, BackfillController, BackfillState, ScrollViewport,
};
use crate::timeline::live::{LIVE_PUSH_KINDS, LiveMergeListener};
use crate::timeline::receipts::{ReadReceiptTracker, ReceiptDecision, ReceiptError, send_receipt};
use crate::timeline::render::{AnchorMarker, TimelineItem, render_items};
use crate::timeline::typing::{TypingTracker, typing_notice};
use crate::timeline::{PaginateOutcome, TimelineWindow, WindowError};

/// Errors returned by [`SessionHandle::refocus`].
#[derive(Debug, thiserror::Error)]
pub enum FocusError {
    /// The room could not be loaded; nothing was focused.
    #[error(transparent)]
    Window(#[from] WindowError),

    /// The session loop has stopped.
    #[error("session has shut down")]
    SessionClosed,
}

/// Commands sent from the UI to the session loop.
#[derive(Debug)]
enum SessionCommand {
    /// Switch the timeline to `room_id`.
    Refocus {
        /// The room to focus.
        room_id: RoomId,
        /// Receives the outcome once the new window is installed.
        reply: oneshot::Sender<Result<(), FocusError>>,
    },
    /// The message list was scrolled.
    Scroll,
    /// Stop the session loop.
    Shutdown,
}

/// Completions and timer firings reported back to the session loop.
#[derive(Debug)]
enum SessionMsg {
    ScrollSettled {
        cap: Capability,
    },
    BackfillFinished {
        cap: Capability,
        result: Result<PaginateOutcome, WindowError>,
    },
    BackfillSettled {
        cap: Capability,
    },
    WindowChanged {
        cap: Capability,
    },
    ReceiptDue {
        cap: Capability,
    },
    ReceiptFinished {
        room_id: RoomId,
        event_id: EventId,
        result: Result<(), ReceiptError>,
    },
}

/// What the UI renders, republished after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineView {
    /// The focused room, if any.
    pub room_id: Option<RoomId>,
    /// The window's events, oldest first.
    pub events: Vec<Event>,
    /// Whether the start of the room's history has been reached.
    pub fully_scrolled: bool,
    /// Remote users typing in the focused room.
    pub typing: Vec<UserId>,
    /// Backfill lifecycle of the focused room.
    pub backfill: BackfillState,
}

impl TimelineView {
    /// Display items for the events.
    #[must_use]
    pub fn items(&self, local_user: &UserId) -> Vec<TimelineItem> {
        render_items(&self.events, local_user)
    }

    /// Marker above the oldest event.
    #[must_use]
    pub const fn anchor(&self) -> AnchorMarker {
        AnchorMarker::for_room(self.fully_scrolled)
    }

    /// Typing status line, if anyone is typing.
    #[must_use]
    pub fn typing_notice(&self) -> Option<String> {
        typing_notice(&self.typing)
    }
}

/// Handle to a running session loop.
pub struct SessionHandle<S> {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<TimelineView>,
    service: Arc<S>,
    media: Arc<MediaCache>,
    local_user: UserId,
    task: JoinHandle<()>,
}

impl<S: EventLogService> SessionHandle<S> {
    /// Focuses `room_id`, replacing the current focus.
    ///
    /// # Errors
    ///
    /// Returns [`FocusError::Window`] with [`WindowError::RoomUnavailable`]
    /// if the room cannot be loaded (the session is then unfocused), or
    /// [`FocusError::SessionClosed`] if the loop has stopped.
    pub async fn refocus(&self, room_id: RoomId) -> Result<(), FocusError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Refocus { room_id, reply })
            .await
            .map_err(|_| FocusError::SessionClosed)?;
        rx.await.map_err(|_| FocusError::SessionClosed)?
    }

    /// Reports a scroll event. Evaluation is debounced by the loop.
    pub fn on_scroll(&self) {
        if let Err(e) = self.commands.try_send(SessionCommand::Scroll) {
            tracing::trace!(error = %e, "dropping scroll notification");
        }
    }

    /// Subscribes to view updates.
    #[must_use]
    pub fn view(&self) -> watch::Receiver<TimelineView> {
        self.view.clone()
    }

    /// The current view.
    #[must_use]
    pub fn snapshot(&self) -> TimelineView {
        self.view.borrow().clone()
    }

    /// Display items of the current view.
    #[must_use]
    pub fn items(&self) -> Vec<TimelineItem> {
        self.view.borrow().items(&self.local_user)
    }

    /// The local user the session acts for.
    #[must_use]
    pub const fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Media bytes at `uri`, downloaded once and cached.
    ///
    /// # Errors
    ///
    /// Returns the [`ServiceError`] of the download; failures are not cached.
    pub async fn media(&self, uri: &MediaUri) -> Result<Arc<Vec<u8>>, ServiceError> {
        self.media
            .get_or_fetch(uri, || self.service.fetch_media(uri))
            .await
    }

    /// Stops the loop, releasing the current focus, and waits for it to exit.
    pub async fn shutdown(self) {
        if self.commands.send(SessionCommand::Shutdown).await.is_err() {
            tracing::debug!("session loop already stopped");
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "session loop ended abnormally");
        }
    }
}

/// Spawns the session loop and returns its handle.
///
/// Must be called from within a tokio runtime.
pub fn spawn_session<S, V>(
    service: Arc<S>,
    viewport: Arc<V>,
    local_user: UserId,
    config: TimelineConfig,
    media: Arc<MediaCache>,
    channel_capacity: usize,
) -> SessionHandle<S>
where
    S: EventLogService + 'static,
    V: ScrollViewport + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(channel_capacity.max(1));
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(TimelineView::default());

    let controller = FocusController {
        service: Arc::clone(&service),
        viewport,
        config,
        registry: RoomSyncRegistry::new(),
        receipts: ReadReceiptTracker::new(local_user.clone()),
        typing: TypingTracker::new(local_user.clone()),
        focus_slot: CapabilitySlot::new(),
        focus: None,
        scroll_timer: DebounceTimer::new(),
        settle_timer: DebounceTimer::new(),
        receipt_timer: DebounceTimer::new(),
        msg_tx,
        view_tx,
    };
    let task = tokio::spawn(controller.run(cmd_rx, msg_rx));

    SessionHandle {
        commands: cmd_tx,
        view: view_rx,
        service,
        media,
        local_user,
        task,
    }
}

/// Everything that exists only while a room is focused.
struct Focus<S> {
    room_id: RoomId,
    window: Arc<TimelineWindow<S>>,
    cap: Capability,
    backfill: BackfillController,
    listener: JoinHandle<()>,
    live_sub: SubscriptionId,
    typing_sub: Option<Subscription>,
}

enum Next {
    Command(Option<SessionCommand>),
    Msg(SessionMsg),
    Typing(Option<Push>),
}

/// Owns the active focus and the session-long room state.
struct FocusController<S, V> {
    service: Arc<S>,
    viewport: Arc<V>,
    config: TimelineConfig,
    registry: RoomSyncRegistry,
    receipts: ReadReceiptTracker,
    typing: TypingTracker,
    focus_slot: CapabilitySlot,
    focus: Option<Focus<S>>,
    scroll_timer: DebounceTimer,
    settle_timer: DebounceTimer,
    receipt_timer: DebounceTimer,
    msg_tx: mpsc::UnboundedSender<SessionMsg>,
    view_tx: watch::Sender<TimelineView>,
}

impl<S, V> FocusController<S, V>
where
    S: EventLogService + 'static,
    V: ScrollViewport + 'static,
{
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut msgs: mpsc::UnboundedReceiver<SessionMsg>,
    ) {
        loop {
            let next = {
                let typing = next_typing(self.focus.as_mut());
                tokio::select! {
                    cmd = commands.recv() => Next::Command(cmd),
                    Some(msg) = msgs.recv() => Next::Msg(msg),
                    push = typing => Next::Typing(push),
                }
            };

            match next {
                Next::Command(Some(SessionCommand::Refocus { room_id, reply })) => {
                    let result = self.refocus(room_id).await;
                    if reply.send(result).is_err() {
                        tracing::debug!("refocus caller went away");
                    }
                }
                Next::Command(Some(SessionCommand::Scroll)) => self.on_scroll(),
                Next::Command(Some(SessionCommand::Shutdown) | None) => {
                    tracing::info!("session loop shutting down");
                    self.release_focus();
                    break;
                }
                Next::Msg(msg) => self.handle_msg(msg),
                Next::Typing(Some(Push::Typing(update))) => {
                    if self.typing.apply(&update) {
                        self.publish();
                    }
                }
                Next::Typing(Some(_)) => {}
                Next::Typing(None) => {
                    tracing::warn!("typing subscription closed by service");
                    if let Some(focus) = self.focus.as_mut() {
                        focus.typing_sub = None;
                    }
                }
            }
        }
    }

    async fn refocus(&mut self, room_id: RoomId) -> Result<(), FocusError> {
        self.release_focus();

        let live_sub = self.service.subscribe(&LIVE_PUSH_KINDS);
        let typing_sub = self.service.subscribe(&[PushKind::Typing]);
        let window = match TimelineWindow::load(
            Arc::clone(&self.service),
            room_id.clone(),
            self.config.initial_window,
        )
        .await
        {
            Ok(window) => Arc::new(window),
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "failed to focus room");
                self.service.unsubscribe(live_sub.id());
                self.service.unsubscribe(typing_sub.id());
                self.publish();
                return Err(e.into());
            }
        };

        let cap = self.focus_slot.issue();
        let fully_scrolled = self.registry.entry(&room_id).fully_scrolled();
        let mut backfill = BackfillController::new(
            self.config.backfill_batch_size,
            self.config.anchor_threshold_px,
        );
        backfill.reset(fully_scrolled);
        self.typing.focus(Some(room_id.clone()));

        let tx = self.msg_tx.clone();
        let live_sub_id = live_sub.id();
        let listener = tokio::spawn(LiveMergeListener::new(Arc::clone(&window)).run(
            live_sub,
            move || {
                let _ = tx.send(SessionMsg::WindowChanged { cap });
            },
        ));

        tracing::info!(room_id = %room_id, events = window.len(), fully_scrolled, "room focused");
        self.focus = Some(Focus {
            room_id,
            window,
            cap,
            backfill,
            listener,
            live_sub: live_sub_id,
            typing_sub: Some(typing_sub),
        });
        self.publish();
        self.evaluate_backfill();
        self.schedule_receipt(cap);
        Ok(())
    }

    fn release_focus(&mut self) {
        self.focus_slot.revoke();
        self.scroll_timer.cancel();
        self.settle_timer.cancel();
        self.receipt_timer.cancel();
        self.typing.focus(None);

        if let Some(focus) = self.focus.take() {
            focus.listener.abort();
            self.service.unsubscribe(focus.live_sub);
            if let Some(sub) = focus.typing_sub {
                self.service.unsubscribe(sub.id());
            }
            focus.window.close();
            tracing::debug!(room_id = %focus.room_id, "focus released");
        }
    }

    fn on_scroll(&mut self) {
        let Some(cap) = self.focus.as_ref().map(|f| f.cap) else {
            return;
        };
        let tx = self.msg_tx.clone();
        self.scroll_timer
            .schedule(self.config.scroll_debounce, async move {
                let _ = tx.send(SessionMsg::ScrollSettled { cap });
            });
    }

    fn handle_msg(&mut self, msg: SessionMsg) {
        match msg {
            SessionMsg::ScrollSettled { cap } => {
                if self.is_current(cap, "scroll") {
                    self.evaluate_backfill();
                }
            }
            SessionMsg::BackfillFinished { cap, result } => {
                if self.is_current(cap, "backfill batch") {
                    self.backfill_finished(cap, result);
                }
            }
            SessionMsg::BackfillSettled { cap } => {
                if self.is_current(cap, "backfill settle") {
                    if let Some(focus) = self.focus.as_mut() {
                        focus.backfill.settled();
                    }
                    self.evaluate_backfill();
                }
            }
            SessionMsg::WindowChanged { cap } => {
                if self.is_current(cap, "window change") {
                    self.publish();
                    self.schedule_receipt(cap);
                }
            }
            SessionMsg::ReceiptDue { cap } => {
                if self.is_current(cap, "receipt reconciliation") {
                    self.reconcile_receipt();
                }
            }
            SessionMsg::ReceiptFinished {
                room_id,
                event_id,
                result,
            } => {
                self.receipts.finish(&room_id, &event_id);
                match result {
                    Ok(()) => self.registry.entry(&room_id).record_receipt(event_id),
                    Err(e) => tracing::warn!(error = %e, "read receipt not sent"),
                }
            }
        }
    }

    fn is_current(&self, cap: Capability, what: &str) -> bool {
        let current = self.focus_slot.is_current(cap) && self.focus.is_some();
        if !current {
            tracing::debug!(what, "discarding stale completion");
        }
        current
    }

    fn evaluate_backfill(&mut self) {
        let geometry = self.viewport.geometry();
        let Some(focus) = self.focus.as_mut() else {
            return;
        };
        let fully_scrolled = self.registry.is_fully_scrolled(&focus.room_id);
        let can_paginate = focus.window.can_paginate(Direction::Backward);

        match focus.backfill.evaluate(geometry, fully_scrolled, can_paginate) {
            BackfillAction::Wait => {}
            BackfillAction::MarkExhausted => {
                tracing::info!(room_id = %focus.room_id, "reached start of room");
                self.registry.entry(&focus.room_id).mark_fully_scrolled();
                self.publish();
            }
            BackfillAction::Fetch { count } => {
                tracing::debug!(room_id = %focus.room_id, count, "backfilling");
                let window = Arc::clone(&focus.window);
                let cap = focus.cap;
                let tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    let result = window.paginate(Direction::Backward, count).await;
                    let _ = tx.send(SessionMsg::BackfillFinished { cap, result });
                });
                self.publish();
            }
        }
    }

    fn backfill_finished(&mut self, cap: Capability, result: Result<PaginateOutcome, WindowError>) {
        let Some(focus) = self.focus.as_mut() else {
            return;
        };
        match result {
            Ok(PaginateOutcome::Applied { added, .. }) => {
                tracing::debug!(room_id = %focus.room_id, added, "backfill batch applied");
                focus.backfill.batch_finished(true);
                let tx = self.msg_tx.clone();
                self.settle_timer
                    .schedule(self.config.backfill_settle, async move {
                        let _ = tx.send(SessionMsg::BackfillSettled { cap });
                    });
            }
            Ok(PaginateOutcome::Superseded) => {
                focus.backfill.batch_finished(false);
            }
            Err(e) => {
                tracing::warn!(room_id = %focus.room_id, error = %e, "backfill failed");
                focus.backfill.batch_finished(false);
            }
        }
        self.publish();
    }

    fn schedule_receipt(&mut self, cap: Capability) {
        let tx = self.msg_tx.clone();
        self.receipt_timer
            .schedule(self.config.receipt_debounce, async move {
                let _ = tx.send(SessionMsg::ReceiptDue { cap });
            });
    }

    fn reconcile_receipt(&mut self) {
        let Some(focus) = self.focus.as_ref() else {
            return;
        };
        let room_id = focus.room_id.clone();
        let last = focus.window.last_event();
        let state = self.registry.entry(&room_id).clone();
        let decision = self
            .receipts
            .reconcile(&*self.service, &room_id, last.as_ref(), &state);

        if let ReceiptDecision::Send(event) = decision {
            let service = Arc::clone(&self.service);
            let tx = self.msg_tx.clone();
            tokio::spawn(async move {
                let result = send_receipt(&*service, &room_id, &event).await;
                let _ = tx.send(SessionMsg::ReceiptFinished {
                    room_id,
                    event_id: event.id,
                    result,
                });
            });
        }
    }

    fn publish(&self) {
        let view = self
            .focus
            .as_ref()
            .map_or_else(TimelineView::default, |focus| TimelineView {
                room_id: Some(focus.room_id.clone()),
                events: focus.window.events(),
                fully_scrolled: self.registry.is_fully_scrolled(&focus.room_id),
                typing: self.typing.users().to_vec(),
                backfill: focus.backfill.state(),
            });
        self.view_tx.send_replace(view);
    }
}

async fn next_typing<S>(focus: Option<&mut Focus<S>>) -> Option<Push> {
    match focus.and_then(|f| f.typing_sub.as_mut()) {
        Some(sub) => sub.recv().await,
        None => pending().await,
    }
}
