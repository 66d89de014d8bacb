//! Node Module
//!
//! Replication position queries against primary and standby nodes.

mod postgres;

pub use postgres::{PgNode, PoolSettings};

use std::fmt;

use crate::error::Result;

/// Opaque replication position reported by a node.
///
/// Positions have no local ordering; "reached" is always evaluated by the
/// standby itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position(String);

impl Position {
    /// Wrap a position as reported by the server
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get the raw textual form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Position {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for Position {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// A connected database node that can report replication progress
#[async_trait::async_trait]
pub trait PositionSource: Send + Sync {
    /// Label used in logs and errors (never contains credentials)
    fn name(&self) -> &str;

    /// Current write position. Only meaningful on the primary.
    async fn current_write_position(&self) -> Result<Position>;

    /// Whether this standby has replayed up to or past `position`.
    ///
    /// Returns [`crate::Error::NotInRecovery`] when the node is not a
    /// standby at all; `Ok(false)` only means it is still behind.
    async fn has_replayed_at_least(&self, position: &Position) -> Result<bool>;

    /// Release the node's connections
    async fn close(&self);
}
