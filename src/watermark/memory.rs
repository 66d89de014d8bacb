//! In-Memory Watermark Store
//!
//! Process-local watermarks for single-instance deployments and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::WatermarkStore;
use crate::error::Result;
use crate::node::Position;

/// Writes between sweeps of expired records
const SWEEP_INTERVAL: usize = 256;

struct Entry {
    position: Position,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// Watermark store kept in a process-local map.
///
/// Expired records are dropped when read and swept every few hundred
/// writes, so the map stays bounded by the keys written within one TTL.
pub struct MemoryWatermarkStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
    writes: AtomicUsize,
}

impl MemoryWatermarkStore {
    /// Create an empty store whose records live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            writes: AtomicUsize::new(0),
        }
    }

    /// Get the configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of records, including expired ones not yet swept
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop expired records, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        sweep(&mut entries)
    }
}

fn sweep(entries: &mut HashMap<String, Entry>) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
}

#[async_trait::async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, key: &str) -> Result<Option<Position>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(Instant::now()) => {
                    return Ok(Some(entry.position.clone()));
                }
                Some(_) => {}
            }
        }

        // Expired: drop it unless a writer refreshed it meanwhile
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.position.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, position: &Position) -> Result<()> {
        let entry = Entry {
            position: position.clone(),
            expires_at: Instant::now().checked_add(self.ttl),
        };

        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            let removed = sweep(&mut entries);
            if removed > 0 {
                tracing::trace!("Swept {} expired watermark(s)", removed);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
