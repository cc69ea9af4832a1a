//! Integration tests for read-receipt reconciliation.
//!
//! Verifies:
//! 1. The confirmed tail of the window is acknowledged exactly once.
//! 2. A pending local echo at the tail holds the receipt back until confirmed.
//! 3. A rejected receipt is sent again by the next reconciliation pass.
//! 4. A burst of window changes produces a single receipt.

use std::sync::Arc;
use std::time::Duration;

use roomview::cache::MediaCache;
use roomview::config::TimelineConfig;
use roomview::service::memory::{InMemoryEventLog, UnreadCounts};
use roomview::session::{SessionHandle, TimelineView, spawn_session};
use roomview::timeline::backfill::{ScrollGeometry, ScrollViewport};

use roomview_proto::event::{EventId, RoomId, UserId};

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

fn room() -> RoomId {
    RoomId::new("!receipts:test")
}

fn service_with(history: usize) -> Arc<InMemoryEventLog> {
    let service = Arc::new(InMemoryEventLog::new(me()));
    service.seed_messages(&room(), &UserId::new("@alice:test"), history);
    service
}

fn start(service: &Arc<InMemoryEventLog>) -> SessionHandle<InMemoryEventLog> {
    spawn_session(
        Arc::clone(service),
        Arc::new(AtBottom),
        me(),
        TimelineConfig::default(),
        Arc::new(MediaCache::new()),
        32,
    )
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

/// Long enough for the receipt debounce to fire and the send to finish.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(400)).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn confirmed_tail_is_acknowledged_once() {
    let service = service_with(5);
    service.set_unread_counts(&room(), UnreadCounts { total: 3, highlight: 1 });
    let session = start(&service);

    session.refocus(room()).await.unwrap();
    settle().await;

    let tail = EventId::new("$5");
    assert_eq!(service.receipts_sent(), vec![(room(), tail.clone())]);
    assert_eq!(service.read_markers_sent(), vec![(room(), tail)]);
    assert_eq!(service.unread_counts(&room()), UnreadCounts::default());

    // Nothing new: further passes, including a refocus, send nothing.
    session.on_scroll();
    settle().await;
    session.refocus(room()).await.unwrap();
    settle().await;
    assert_eq!(service.receipts_sent().len(), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pending_echo_holds_receipt_until_confirmed() {
    let service = service_with(1);
    let session = start(&service);

    session.refocus(room()).await.unwrap();
    let echo = service.send_local_echo(&room(), "draft");
    assert!(wait_for_view(&session, |v| v.events.len() == 2).await);
    settle().await;
    assert!(service.receipts_sent().is_empty(), "tail is a pending echo");

    let canonical = service.confirm_local_echo(&room(), &echo).unwrap();
    assert!(wait_for_view(&session, |v| v.events.iter().any(|e| e.id == canonical)).await);
    settle().await;
    assert_eq!(service.receipts_sent(), vec![(room(), canonical)]);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_receipt_is_sent_on_next_pass() {
    let service = service_with(3);
    service.set_unread_counts(&room(), UnreadCounts { total: 4, highlight: 0 });
    service.fail_receipts(true);
    let session = start(&service);

    session.refocus(room()).await.unwrap();
    settle().await;
    assert!(service.receipts_sent().is_empty());
    assert!(service.read_markers_sent().is_empty());
    assert_eq!(service.unread_counts(&room()).total, 4);

    service.fail_receipts(false);
    session.refocus(room()).await.unwrap();
    settle().await;
    assert_eq!(service.receipts_sent(), vec![(room(), EventId::new("$3"))]);
    assert_eq!(service.unread_counts(&room()), UnreadCounts::default());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn burst_of_changes_sends_one_receipt() {
    let service = service_with(2);
    let session = start(&service);

    session.refocus(room()).await.unwrap();
    settle().await;
    assert_eq!(service.receipts_sent(), vec![(room(), EventId::new("$2"))]);

    let bob = UserId::new("@bob:test");
    let mut burst = Vec::new();
    for i in 0..5 {
        burst.push(service.append_message(&room(), &bob, &format!("burst {i}")));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let last = burst.pop().unwrap();
    assert!(wait_for_view(&session, |v| v.events.len() == 7).await);
    settle().await;

    assert_eq!(
        service.receipts_sent(),
        vec![(room(), EventId::new("$2")), (room(), last)]
    );

    session.shutdown().await;
}
