//! `roomview`: timeline window, backfill and live-merge engine for
//! room-based chat clients.
//!
//! The engine keeps a bounded, ordered window over a room's event log,
//! extends it backward as the user scrolls, merges live pushes into it and
//! keeps read receipts in step. A UI drives it through
//! [`session::spawn_session`].

pub mod cache;
pub mod cancel;
pub mod config;
pub mod rooms;
pub mod service;
pub mod session;
pub mod timeline;
