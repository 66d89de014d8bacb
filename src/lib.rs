//! stickyroute - Read-Your-Writes Routing for PostgreSQL
//!
//! Routes reads across a primary/standby cluster without giving up
//! per-key consistency: a read for a key never observes data older than
//! the last write recorded for that key.
//!
//! # Architecture
//!
//! After a write commits, the caller records the primary's current WAL
//! position (the key's *watermark*) in a [`watermark::WatermarkStore`].
//! When reading, the [`lb::ConsistencyRouter`] asks standbys, starting from
//! a random one, whether they have replayed past the watermark and hands
//! out the first that has. Otherwise the primary serves the read.
//!
//! # Features
//!
//! - Server-side position comparison (`pg_lsn`), never local string compares
//! - TTL-bounded watermarks in SQLite or process memory
//! - Per-query timeout bounded by the caller's deadline
//! - Distinct errors for lag, unreachable nodes and misconfigured standbys

pub mod config;
pub mod error;
pub mod lb;
pub mod node;
pub mod watermark;

pub use config::RouterConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::RouterConfig;
    pub use crate::error::{Error, Result};
    pub use crate::lb::ConsistencyRouter;
    pub use crate::node::{PgNode, Position, PositionSource};
    pub use crate::watermark::{MemoryWatermarkStore, SqliteWatermarkStore, WatermarkStore};
}
