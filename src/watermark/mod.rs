//! Watermark Module
//!
//! Per-key storage of the last write position recorded for a key.
//! Records expire after a TTL and are overwritten on every write.

mod memory;
mod sqlite;

pub use memory::MemoryWatermarkStore;
pub use sqlite::SqliteWatermarkStore;

use std::sync::Arc;

use crate::error::Result;
use crate::node::Position;

/// Default namespace for watermark keys in a shared backing store
pub const DEFAULT_KEY_PREFIX: &str = "stickyroute:lsn:key:";

/// Storage for per-key watermarks
///
/// `get` must distinguish "nothing recorded" (`Ok(None)`) from an
/// unreachable backend (`Err`); the router falls back to the primary only
/// in the first case.
#[async_trait::async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Get the non-expired position recorded for `key`
    async fn get(&self, key: &str) -> Result<Option<Position>>;

    /// Record `position` for `key`, replacing any previous value and
    /// refreshing the TTL
    async fn set(&self, key: &str, position: &Position) -> Result<()>;

    /// Remove the record for `key`
    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: WatermarkStore + ?Sized> WatermarkStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Position>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, position: &Position) -> Result<()> {
        (**self).set(key, position).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}
