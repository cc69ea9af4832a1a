//! Pagination directions and cursors.

use serde::{Deserialize, Serialize};

/// Direction of a pagination request relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Towards the live end (newer events).
    Forward,
    /// Towards the start of the room (older events).
    Backward,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Backward => write!(f, "backward"),
        }
    }
}

/// Opaque position in a room's log, issued by the event log service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaginationToken(String);

impl PaginationToken {
    /// Wrap a service-issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Return the raw token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaginationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pagination cursor: either a resumable token or the exhausted sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cursor {
    /// More events may be fetched from this position.
    Token(PaginationToken),
    /// No further events exist in this direction.
    Exhausted,
}

impl Cursor {
    /// Whether the cursor has reached the sentinel.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }

    /// The resumable token, unless exhausted.
    #[must_use]
    pub const fn token(&self) -> Option<&PaginationToken> {
        match self {
            Self::Token(token) => Some(token),
            Self::Exhausted => None,
        }
    }
}
