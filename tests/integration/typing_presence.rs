//! Integration tests for typing presence in the focused room.
//!
//! Verifies:
//! 1. The local user never appears in the typing set.
//! 2. Typing pushes for other rooms are ignored.
//! 3. The status line follows the size of the typing set.
//! 4. Switching rooms clears the set.

use std::sync::Arc;
use std::time::Duration;

use roomview::cache::MediaCache;
use roomview::config::TimelineConfig;
use roomview::service::memory::InMemoryEventLog;
use roomview::session::{SessionHandle, TimelineView, spawn_session};
use roomview::timeline::backfill::{ScrollGeometry, ScrollViewport};

use roomview_proto::event::{RoomId, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

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

fn carol() -> UserId {
    UserId::new("@carol:test")
}

fn room() -> RoomId {
    RoomId::new("!chatter:test")
}

async fn focused() -> (Arc<InMemoryEventLog>, SessionHandle<InMemoryEventLog>) {
    let service = Arc::new(InMemoryEventLog::new(me()));
    service.seed_messages(&room(), &bob(), 3);
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn local_user_is_excluded() {
    let (service, session) = focused().await;

    service.set_typing(&room(), vec![me(), bob()]);
    assert!(wait_for_view(&session, |v| !v.typing.is_empty()).await);

    let view = session.snapshot();
    assert_eq!(view.typing, vec![bob()]);
    assert_eq!(view.typing_notice().as_deref(), Some("@bob:test is typing"));

    // Only the local user typing shows nothing.
    service.set_typing(&room(), vec![me()]);
    assert!(wait_for_view(&session, |v| v.typing.is_empty()).await);
    assert_eq!(session.snapshot().typing_notice(), None);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn other_rooms_are_ignored() {
    let (service, session) = focused().await;
    let elsewhere = RoomId::new("!elsewhere:test");
    service.create_room(&elsewhere);

    service.set_typing(&elsewhere, vec![carol()]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.snapshot().typing.is_empty());

    service.set_typing(&room(), vec![bob()]);
    service.set_typing(&elsewhere, vec![carol(), bob()]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.snapshot().typing, vec![bob()]);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn notice_follows_typing_set() {
    let (service, session) = focused().await;

    service.set_typing(&room(), vec![bob(), carol()]);
    assert!(wait_for_view(&session, |v| v.typing.len() == 2).await);
    assert_eq!(
        session.snapshot().typing_notice().as_deref(),
        Some("@bob:test and @carol:test are typing")
    );

    service.set_typing(&room(), vec![bob(), carol(), UserId::new("@dave:test")]);
    assert!(wait_for_view(&session, |v| v.typing.len() == 3).await);
    assert_eq!(
        session.snapshot().typing_notice().as_deref(),
        Some("several people are typing")
    );

    service.set_typing(&room(), Vec::new());
    assert!(wait_for_view(&session, |v| v.typing.is_empty()).await);
    assert_eq!(session.snapshot().typing_notice(), None);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refocus_clears_typing() {
    let (service, session) = focused().await;
    let other = RoomId::new("!other:test");
    service.seed_messages(&other, &carol(), 1);

    service.set_typing(&room(), vec![bob()]);
    assert!(wait_for_view(&session, |v| v.typing == vec![bob()]).await);

    session.refocus(other.clone()).await.unwrap();
    let view = session.snapshot();
    assert_eq!(view.room_id, Some(other.clone()));
    assert!(view.typing.is_empty());

    // The new room's pushes are picked up.
    service.set_typing(&other, vec![carol()]);
    assert!(wait_for_view(&session, |v| v.typing == vec![carol()]).await);

    session.shutdown().await;
}
