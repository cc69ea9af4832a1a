//! Shared data model for `roomview`: events, identifiers, pagination cursors
//! and push notifications exchanged with the event log service.

pub mod event;
pub mod pagination;
pub mod push;
pub mod typing;
