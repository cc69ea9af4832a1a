//! `roomview`: timeline engine demo.
//!
//! Seeds an in-memory event log, focuses a room, scrolls to the top until
//! the whole history is loaded, merges a few live updates and prints the
//! rendered timeline. Configuration via CLI flags, environment variables,
//! or config file (`~/.config/roomview/config.toml`).
//!
//! ```bash
//! cargo run --bin roomview
//!
//! # Pick the user and room
//! cargo run --bin roomview -- --user-id @carol:demo --room '!quiet:demo'
//!
//! # Or via environment variables
//! ROOMVIEW_USER=@carol:demo ROOMVIEW_LOG=debug cargo run
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use roomview::cache::MediaCache;
use roomview::config::{CliArgs, ClientConfig};
use roomview::service::memory::InMemoryEventLog;
use roomview::session::{SessionHandle, TimelineView, spawn_session};
use roomview::timeline::backfill::{ScrollGeometry, ScrollViewport};
use roomview::timeline::render::{TimelineItem, format_timestamp, reaction_counts, redacted_label};
use roomview_proto::event::{Event, RoomId, UserId};

const DEFAULT_USER: &str = "@me:demo";
const DEFAULT_ROOM: &str = "!lobby:demo";
const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);

/// A viewport that is always scrolled to the very top.
struct PinnedToTop;

impl ScrollViewport for PinnedToTop {
    fn geometry(&self) -> ScrollGeometry {
        ScrollGeometry {
            container_top: 0.0,
            anchor_top: 0.0,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load configuration: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("roomview starting");

    let local_user = UserId::new(config.user_id.as_deref().unwrap_or(DEFAULT_USER));
    let room_id = RoomId::new(config.room.as_deref().unwrap_or(DEFAULT_ROOM));

    let service = Arc::new(InMemoryEventLog::new(local_user.clone()));
    seed(&service, &room_id, &local_user);

    let session = spawn_session(
        Arc::clone(&service),
        Arc::new(PinnedToTop),
        local_user.clone(),
        config.timeline.clone(),
        Arc::new(MediaCache::new()),
        config.channel_capacity,
    );

    let code = match run(&service, &session, &room_id, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    };

    session.shutdown().await;
    tracing::info!("roomview exiting");
    code
}

async fn run(
    service: &InMemoryEventLog,
    session: &SessionHandle<InMemoryEventLog>,
    room_id: &RoomId,
    config: &ClientConfig,
) -> Result<(), String> {
    session
        .refocus(room_id.clone())
        .await
        .map_err(|e| format!("cannot open {room_id}: {e}"))?;

    let mut view = session.view();
    let loaded = tokio::time::timeout(HISTORY_TIMEOUT, async {
        view.wait_for(|v| v.fully_scrolled).await.map(|_| ())
    })
    .await;
    match loaded {
        Ok(Ok(())) => {}
        Ok(Err(_)) => return Err("session stopped while loading history".into()),
        Err(_) => tracing::warn!(room_id = %room_id, "history still incomplete, rendering anyway"),
    }

    // A little live traffic: a typing peer, a confirmed local echo, a reply.
    let bob = UserId::new("@bob:demo");
    service.set_typing(room_id, vec![bob.clone(), session.local_user().clone()]);
    let echo = service.send_local_echo(room_id, "see you all tomorrow");
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.confirm_local_echo(room_id, &echo);
    service.append_message(room_id, &bob, "bye!");
    tokio::time::sleep(config.timeline.receipt_debounce + Duration::from_millis(100)).await;

    print_view(&session.snapshot(), session.local_user(), &config.timestamp_format);
    for (room, event_id) in service.receipts_sent() {
        println!("read receipt sent in {room} for {event_id}");
    }
    Ok(())
}

fn print_view(view: &TimelineView, local_user: &UserId, timestamp_format: &str) {
    let room = view
        .room_id
        .as_ref()
        .map_or_else(|| "(no room)".to_owned(), ToString::to_string);
    println!("# {room}");
    println!("  {}", view.anchor().label());

    for item in view.items(local_user) {
        match item {
            TimelineItem::SenderHeader { sender, is_me } => {
                println!("{sender}{}", if is_me { " (you)" } else { "" });
            }
            TimelineItem::Message {
                event,
                reactions,
                in_reply_to,
            } => {
                let time = format_timestamp(event.origin_ts, timestamp_format);
                let body = event.body().unwrap_or_default();
                let reply = in_reply_to.map(|id| format!(" (re {id})")).unwrap_or_default();
                let counts: Vec<String> = reaction_counts(&reactions)
                    .into_iter()
                    .map(|(key, n)| format!("{key} {n}"))
                    .collect();
                let reactions = if counts.is_empty() {
                    String::new()
                } else {
                    format!("  [{}]", counts.join(", "))
                };
                println!("  {time} {body}{reply}{reactions}");
            }
            TimelineItem::Redacted { count, .. } => {
                println!("  -- {} --", redacted_label(count));
            }
        }
    }

    if let Some(notice) = view.typing_notice() {
        println!("  ({notice})");
    }
}

/// Fills the demo rooms with history.
fn seed(service: &InMemoryEventLog, room_id: &RoomId, local_user: &UserId) {
    let alice = UserId::new("@alice:demo");
    let bob = UserId::new("@bob:demo");

    service.create_room(&RoomId::new("!quiet:demo"));
    service.seed_messages(&RoomId::new("!quiet:demo"), &alice, 3);

    let first = service.seed_messages(room_id, &alice, 20);
    service.seed_messages(room_id, &bob, 12);
    let gone: Vec<_> = service.seed_messages(room_id, &bob, 2);
    service.seed_messages(room_id, local_user, 8);

    if let Some(target) = first.first() {
        for (sender, key) in [(&bob, "👍"), (local_user, "👍"), (&bob, "🎉")] {
            service.append(Event::reaction("", room_id.clone(), sender.clone(), target, key, 0));
        }
    }
    for id in &gone {
        service.redact(room_id, id, &bob);
    }
}

/// Initialize file-based logging.
///
/// Logs are written to `file_path` if provided, otherwise to
/// `$TMPDIR/roomview.log`. Returns a guard that must be held for the
/// lifetime of the program to ensure logs are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("roomview.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
