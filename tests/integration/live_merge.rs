//! Integration tests for merging live pushes into the focused window.
//!
//! Verifies:
//! 1. Remote appends land at the live end in push order.
//! 2. A local echo is shown pending and then replaced in place on confirmation.
//! 3. Redactions clear their targets and collapse into one placeholder.
//! 4. Pushes for other rooms never touch the window.
//! 5. A push that failed to merge is caught up by the next one, even when
//!    the failed push was a redaction.

use std::sync::Arc;
use std::time::Duration;

use roomview::cache::MediaCache;
use roomview::config::TimelineConfig;
use roomview::service::memory::InMemoryEventLog;
use roomview::session::{SessionHandle, TimelineView, spawn_session};
use roomview::timeline::backfill::{ScrollGeometry, ScrollViewport};
use roomview::timeline::render::TimelineItem;

use roomview_proto::event::{ConfirmationStatus, EventId, RoomId, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Viewport scrolled to the live end, so no backfill interferes.
struct AtBottom;

impl ScrollViewport for AtBottom {
    fn geometry(&self) -> ScrollGeometry {
        ScrollGeometry {
            container_top: 0.0,
            anchor_top: -2_000.0,
        }
    }
}

fn me() -> UserId {
    UserId::new("@me:test")
}

fn bob() -> UserId {
    UserId::new("@bob:test")
}

fn room() -> RoomId {
    RoomId::new("!live:test")
}

async fn focused(history: usize) -> (Arc<InMemoryEventLog>, SessionHandle<InMemoryEventLog>) {
    let service = Arc::new(InMemoryEventLog::new(me()));
    service.seed_messages(&room(), &UserId::new("@alice:test"), history);
    let session = spawn_session(
        Arc::clone(&service),
        Arc::new(AtBottom),
        me(),
        TimelineConfig::default(),
        Arc::new(MediaCache::new()),
        32,
    );
    session.refocus(room()).await.unwrap();
    (service, session)
}

async fn wait_for_view(
    session: &SessionHandle<InMemoryEventLog>,
    pred: impl Fn(&TimelineView) -> bool,
) -> bool {
    let mut view = session.view();
    tokio::time::timeout(Duration::from_secs(5), view.wait_for(|v| pred(v)))
        .await
        .is_ok_and(|r| r.is_ok())
}

fn bodies(view: &TimelineView) -> Vec<String> {
    view.events
        .iter()
        .filter_map(|e| e.body().map(str::to_owned))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn appends_arrive_in_push_order() {
    let (service, session) = focused(3).await;

    for body in ["one", "two", "three"] {
        service.append_message(&room(), &bob(), body);
    }

    assert!(wait_for_view(&session, |v| v.events.len() == 6).await);
    assert_eq!(
        bodies(&session.snapshot()),
        ["message 1", "message 2", "message 3", "one", "two", "three"]
    );

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn local_echo_is_replaced_in_place() {
    let (service, session) = focused(2).await;

    let echo = service.send_local_echo(&room(), "on my way");
    assert!(wait_for_view(&session, |v| v.events.iter().any(|e| e.id == echo)).await);
    let pending = session.snapshot();
    assert_eq!(pending.events.len(), 3);
    assert!(pending.events[2].is_pending());

    let canonical = service.confirm_local_echo(&room(), &echo).unwrap();
    assert!(wait_for_view(&session, |v| v.events.iter().any(|e| e.id == canonical)).await);

    let view = session.snapshot();
    assert_eq!(view.events.len(), 3, "echo must not be duplicated");
    assert_eq!(view.events[2].id, canonical);
    assert_eq!(view.events[2].status, ConfirmationStatus::Sent);
    assert!(!view.events.iter().any(|e| e.id == echo));

    // A later remote message still lands after the confirmed echo.
    service.append_message(&room(), &bob(), "see you");
    assert!(wait_for_view(&session, |v| v.events.len() == 4).await);
    assert_eq!(
        bodies(&session.snapshot()),
        ["message 1", "message 2", "on my way", "see you"]
    );

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn redactions_collapse_into_placeholder() {
    let (service, session) = focused(2).await;

    let first = service.append_message(&room(), &bob(), "oops");
    let second = service.append_message(&room(), &bob(), "oops again");
    service.redact(&room(), &first, &bob()).unwrap();
    service.redact(&room(), &second, &bob()).unwrap();

    assert!(
        wait_for_view(&session, |v| v.events.iter().filter(|e| e.redacted).count() == 2).await
    );

    let items = session.items();
    match items.last() {
        Some(TimelineItem::Redacted {
            first_id,
            sender,
            count,
            is_me,
        }) => {
            assert_eq!(*first_id, first);
            assert_eq!(*sender, bob());
            assert_eq!(*count, 2);
            assert!(!is_me);
        }
        other => panic!("expected a redaction placeholder, got {other:?}"),
    }
    // Redaction events themselves are not part of the window.
    assert_eq!(session.snapshot().events.len(), 4);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pushes_for_other_rooms_are_ignored() {
    let (service, session) = focused(4).await;
    let before = session.snapshot();
    let calls = service.pagination_calls();

    let elsewhere = RoomId::new("!elsewhere:test");
    service.create_room(&elsewhere);
    service.append_message(&elsewhere, &bob(), "not for you");
    service.set_typing(&elsewhere, vec![bob()]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(session.snapshot(), before);
    assert_eq!(service.pagination_calls(), calls);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_merge_is_caught_up_by_next_push() {
    let (service, session) = focused(2).await;

    service.fail_next_paginations(1);
    service.append_message(&room(), &bob(), "lost on first try");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.snapshot().events.len(), 2);

    service.append_message(&room(), &bob(), "second");
    assert!(wait_for_view(&session, |v| v.events.len() == 4).await);
    assert_eq!(
        bodies(&session.snapshot()),
        ["message 1", "message 2", "lost on first try", "second"]
    );

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_redaction_merge_is_caught_up_by_next_push() {
    let (service, session) = focused(3).await;

    service.fail_next_paginations(1);
    service.redact(&room(), &EventId::new("$2"), &UserId::new("@alice:test")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!session.snapshot().events[1].redacted);

    let after = service.append_message(&room(), &bob(), "after the redaction");
    assert!(wait_for_view(&session, |v| v.events.iter().any(|e| e.id == after)).await);

    let view = session.snapshot();
    assert_eq!(view.events.len(), 4);
    assert!(view.events[1].redacted);
    assert_eq!(view.events.last().map(|e| e.id.clone()), Some(after));

    session.shutdown().await;
}
