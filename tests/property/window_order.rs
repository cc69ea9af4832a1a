//! Property-based ordering tests for the timeline window.
//!
//! Uses proptest to verify:
//! 1. For any log size, initial limit and batch size, the window is always a
//!    gap-free, duplicate-free slice of the true log, and equals the whole
//!    log once backward pagination is exhausted.
//! 2. Interleaving backward pages with live appends (merged forward) keeps
//!    the window contiguous.
//! 3. Of two overlapping backward requests, only the later one applies,
//!    whichever completes first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use roomview::service::memory::InMemoryEventLog;
use roomview::timeline::{PaginateOutcome, TimelineWindow};
use roomview_proto::event::{EventId, RoomId, UserId};
use roomview_proto::pagination::Direction;

// --- Helpers ---

fn room() -> RoomId {
    RoomId::new("!prop:test")
}

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
        .block_on(future)
}

fn seeded(total: usize) -> Arc<InMemoryEventLog> {
    let service = Arc::new(InMemoryEventLog::new(UserId::new("@me:test")));
    service.create_room(&room());
    service.seed_messages(&room(), &UserId::new("@alice:test"), total);
    service
}

fn ids_of(window: &TimelineWindow<InMemoryEventLog>) -> Vec<EventId> {
    window.events().into_iter().map(|e| e.id).collect()
}

/// Asserts that `window` is a contiguous slice of `log` without duplicates.
fn assert_contiguous(window: &[EventId], log: &[EventId]) -> Result<(), TestCaseError> {
    let Some(first) = window.first() else {
        return Ok(());
    };
    let start = log.iter().position(|id| id == first);
    prop_assert!(start.is_some(), "window starts with an id not in the log");
    let start = start.unwrap_or_default();
    prop_assert!(start + window.len() <= log.len());
    prop_assert_eq!(window, &log[start..start + window.len()]);
    Ok(())
}

/// One step of an interleaved scenario.
#[derive(Debug, Clone)]
enum Step {
    /// Fetch one backward batch.
    Backfill,
    /// Append `n` live messages and merge them forward.
    Append(usize),
}

/// Strategy for generating interleaved backfill/append sequences.
fn arb_steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![Just(Step::Backfill), (1usize..4).prop_map(Step::Append)],
        0..20,
    )
}

// --- Properties ---

proptest! {
    #[test]
    fn backfill_yields_contiguous_suffix(
        total in 0usize..80,
        initial in 1usize..30,
        batch in 1usize..15,
    ) {
        block_on(async {
            let service = seeded(total);
            let log: Vec<EventId> = service.log(&room()).into_iter().map(|e| e.id).collect();
            let window = TimelineWindow::load(Arc::clone(&service), room(), initial)
                .await
                .unwrap();

            let expected_start = total.saturating_sub(initial);
            prop_assert_eq!(ids_of(&window), log[expected_start..].to_vec());

            let mut rounds = 0;
            while window.can_paginate(Direction::Backward) {
                let outcome = window.paginate(Direction::Backward, batch).await.unwrap();
                prop_assert!(matches!(outcome, PaginateOutcome::Applied { .. }), "expected PaginateOutcome::Applied");
                assert_contiguous(&ids_of(&window), &log)?;
                prop_assert_eq!(window.events().last().map(|e| e.id.clone()), log.last().cloned());
                rounds += 1;
                prop_assert!(rounds <= total / batch + 1, "pagination did not terminate");
            }

            prop_assert_eq!(ids_of(&window), log);
            Ok(())
        })?;
    }

    #[test]
    fn interleaved_appends_stay_contiguous(
        total in 0usize..40,
        initial in 1usize..20,
        batch in 1usize..10,
        steps in arb_steps(),
    ) {
        block_on(async {
            let service = seeded(total);
            let bob = UserId::new("@bob:test");
            let window = TimelineWindow::load(Arc::clone(&service), room(), initial)
                .await
                .unwrap();

            for step in steps {
                match step {
                    Step::Backfill => {
                        window.paginate(Direction::Backward, batch).await.unwrap();
                    }
                    Step::Append(n) => {
                        for i in 0..n {
                            service.append_message(&room(), &bob, &format!("live {i}"));
                        }
                        for _ in 0..n {
                            window.paginate(Direction::Forward, 1).await.unwrap();
                        }
                    }
                }
                let log: Vec<EventId> = service.log(&room()).into_iter().map(|e| e.id).collect();
                let ids = ids_of(&window);
                assert_contiguous(&ids, &log)?;
                prop_assert_eq!(ids.last(), log.last());
            }

            while window.can_paginate(Direction::Backward) {
                window.paginate(Direction::Backward, batch).await.unwrap();
            }
            let log: Vec<EventId> = service.log(&room()).into_iter().map(|e| e.id).collect();
            prop_assert_eq!(ids_of(&window), log);
            Ok(())
        })?;
    }

    #[test]
    fn only_latest_backward_request_applies(
        first_delay in 1u64..50,
        second_delay in 1u64..50,
        batch in 1usize..10,
    ) {
        block_on(async {
            let service = seeded(60);
            let window = TimelineWindow::load(Arc::clone(&service), room(), 20)
                .await
                .unwrap();
            service.delay_next_paginations([
                Duration::from_millis(first_delay),
                Duration::from_millis(second_delay),
            ]);

            let (older, newer) = tokio::join!(
                window.paginate(Direction::Backward, batch),
                async {
                    tokio::task::yield_now().await;
                    window.paginate(Direction::Backward, batch).await
                },
            );

            prop_assert_eq!(older.unwrap(), PaginateOutcome::Superseded);
            prop_assert!(matches!(newer.unwrap(), PaginateOutcome::Applied { added, .. } if added == batch), "expected PaginateOutcome::Applied with added == batch");
            prop_assert_eq!(window.len(), 20 + batch);

            let log: Vec<EventId> = service.log(&room()).into_iter().map(|e| e.id).collect();
            assert_contiguous(&ids_of(&window), &log)?;
            Ok(())
        })?;
    }
}
