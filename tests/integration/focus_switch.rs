//! Integration tests for switching the focused room.
//!
//! Verifies:
//! 1. The fully-scrolled state of a room survives leaving and re-entering it.
//! 2. A backfill batch started for a previous room never reaches the new one.
//! 3. Each focus holds exactly its own push subscriptions.
//! 4. Focusing an unavailable room leaves the session unfocused and clean.

use std::sync::Arc;
use std::time::Duration;

use roomview::cache::MediaCache;
use roomview::config::TimelineConfig;
use roomview::service::memory::InMemoryEventLog;
use roomview::session::{FocusError, SessionHandle, spawn_session};
use roomview::timeline::WindowError;
use roomview::timeline::backfill::{BackfillState, ScrollGeometry, ScrollViewport};

use roomview_proto::event::{RoomId, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct AtTop;

impl ScrollViewport for AtTop {
    fn geometry(&self) -> ScrollGeometry {
        ScrollGeometry {
            container_top: 0.0,
            anchor_top: 0.0,
        }
    }
}

fn room_a() -> RoomId {
    RoomId::new("!a:test")
}

fn room_b() -> RoomId {
    RoomId::new("!b:test")
}

fn alice() -> UserId {
    UserId::new("@alice:test")
}

fn start(service: &Arc<InMemoryEventLog>) -> SessionHandle<InMemoryEventLog> {
    spawn_session(
        Arc::clone(service),
        Arc::new(AtTop),
        UserId::new("@me:test"),
        TimelineConfig::default(),
        Arc::new(MediaCache::new()),
        32,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn fully_scrolled_survives_refocus() {
    let service = Arc::new(InMemoryEventLog::new(UserId::new("@me:test")));
    service.seed_messages(&room_a(), &alice(), 5);
    service.seed_messages(&room_b(), &alice(), 8);
    let session = start(&service);

    session.refocus(room_a()).await.unwrap();
    let view = session.snapshot();
    assert!(view.fully_scrolled, "small room is exhausted from the start");
    assert_eq!(view.backfill, BackfillState::Exhausted);

    session.refocus(room_b()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.snapshot().room_id, Some(room_b()));

    session.refocus(room_a()).await.unwrap();
    let view = session.snapshot();
    assert_eq!(view.room_id, Some(room_a()));
    assert!(view.fully_scrolled);
    assert_eq!(view.backfill, BackfillState::Exhausted);
    assert_eq!(view.events.len(), 5);
    assert_eq!(service.pagination_calls(), 0);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stale_backfill_is_discarded_after_switch() {
    let service = Arc::new(InMemoryEventLog::new(UserId::new("@me:test")));
    service.seed_messages(&room_a(), &alice(), 40);
    service.seed_messages(&room_b(), &UserId::new("@bob:test"), 3);
    service.delay_next_paginations([Duration::from_secs(1)]);
    let session = start(&service);

    session.refocus(room_a()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(service.pagination_calls(), 1, "batch for A is in flight");

    session.refocus(room_b()).await.unwrap();
    // Live traffic for A after the switch must not reach B either.
    service.append_message(&room_a(), &alice(), "late");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let view = session.snapshot();
    assert_eq!(view.room_id, Some(room_b()));
    assert_eq!(view.events.len(), 3);
    assert!(view.events.iter().all(|e| e.room_id == room_b()));
    assert!(view.fully_scrolled);

    // Coming back to A starts from a fresh window and is not exhausted.
    session.refocus(room_a()).await.unwrap();
    let view = session.snapshot();
    assert!(!view.fully_scrolled);
    assert!(view.events.iter().all(|e| e.room_id == room_a()));
    assert_eq!(view.events.last().and_then(|e| e.body()), Some("late"));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn each_focus_holds_two_subscriptions() {
    let service = Arc::new(InMemoryEventLog::new(UserId::new("@me:test")));
    service.seed_messages(&room_a(), &alice(), 2);
    service.seed_messages(&room_b(), &alice(), 2);
    let session = start(&service);
    assert_eq!(service.subscriber_count(), 0);

    for room in [room_a(), room_b(), room_a(), room_b()] {
        session.refocus(room).await.unwrap();
        assert_eq!(service.subscriber_count(), 2);
    }

    session.shutdown().await;
    assert_eq!(service.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unavailable_room_leaves_session_unfocused() {
    let service = Arc::new(InMemoryEventLog::new(UserId::new("@me:test")));
    service.seed_messages(&room_a(), &alice(), 2);
    let gone = RoomId::new("!gone:test");
    service.create_room(&gone);
    service.mark_unavailable(&gone);
    let session = start(&service);

    session.refocus(room_a()).await.unwrap();
    let err = session.refocus(gone.clone()).await.unwrap_err();
    match err {
        FocusError::Window(WindowError::RoomUnavailable { room_id, .. }) => {
            assert_eq!(room_id, gone);
        }
        other => panic!("expected RoomUnavailable, got {other:?}"),
    }

    let view = session.snapshot();
    assert!(view.room_id.is_none());
    assert!(view.events.is_empty());
    assert_eq!(service.subscriber_count(), 0);

    // The session is still usable.
    session.refocus(room_a()).await.unwrap();
    assert_eq!(session.snapshot().events.len(), 2);
    assert_eq!(service.subscriber_count(), 2);

    session.shutdown().await;
}
