//! Consistency Routing Module
//!
//! Routes writes to the primary and reads to a standby that has already
//! replayed the last write recorded for the key being read. Falls back to
//! the primary whenever no such standby can be found.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::node::{PgNode, PoolSettings, Position, PositionSource};
use crate::watermark::WatermarkStore;

/// Ceiling for a single position query or store round trip
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Read-your-writes router over one primary and a fixed set of standbys.
///
/// The router keeps no per-key state of its own: watermarks live in the
/// store, and all operations take `&self`, so one router can serve any
/// number of concurrent callers.
pub struct ConsistencyRouter<N, S> {
    /// The only write target
    primary: N,
    /// Read candidates, in configured order
    standbys: Vec<N>,
    /// Per-key write positions
    store: S,
    /// Upper bound on each network round trip
    query_timeout: Duration,
}

impl<S: WatermarkStore> ConsistencyRouter<PgNode, S> {
    /// Connect to the primary and every standby.
    ///
    /// Any node that cannot be reached fails the whole construction; pools
    /// opened before the failure are closed first.
    pub async fn connect(config: &ClusterConfig, store: S) -> Result<Self> {
        let settings = PoolSettings::from(config);

        let router = Self::connect_with(&config.primary, &config.standbys, store, |dsn| {
            let settings = settings.clone();
            async move { PgNode::connect(&dsn, &settings).await }
        })
        .await?;

        Ok(router.with_query_timeout(Duration::from_millis(config.query_timeout_ms)))
    }
}

impl<N: PositionSource, S: WatermarkStore> ConsistencyRouter<N, S> {
    /// Create a router from already connected nodes
    pub fn new(primary: N, standbys: Vec<N>, store: S) -> Self {
        Self {
            primary,
            standbys,
            store,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Build a router by connecting every node through `connect`.
    ///
    /// The primary is connected first, then standbys in order. On the first
    /// failure every node opened so far is closed and the error returned.
    pub async fn connect_with<F, Fut>(
        primary_dsn: &str,
        standby_dsns: &[String],
        store: S,
        mut connect: F,
    ) -> Result<Self>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<N>>,
    {
        let primary = connect(primary_dsn.to_string()).await?;

        let mut standbys = Vec::with_capacity(standby_dsns.len());
        for dsn in standby_dsns {
            match connect(dsn.clone()).await {
                Ok(node) => standbys.push(node),
                Err(e) => {
                    tracing::warn!(
                        "Standby connection failed, closing {} already opened node(s)",
                        standbys.len() + 1
                    );
                    primary.close().await;
                    futures::future::join_all(standbys.iter().map(|node| node.close())).await;
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "Router ready: primary {}, {} standby(s)",
            primary.name(),
            standbys.len()
        );

        Ok(Self::new(primary, standbys, store))
    }

    /// Override the per-query timeout ceiling
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Get the node all writes must go through
    pub fn write_target(&self) -> &N {
        &self.primary
    }

    pub fn standbys(&self) -> &[N] {
        &self.standbys
    }

    pub fn standby_count(&self) -> usize {
        self.standbys.len()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Record the primary's current write position for `key`.
    ///
    /// Call this after a write touching `key` has committed and before any
    /// read that must observe it. Concurrent calls for the same key are not
    /// ordered: whichever store update lands last is kept.
    pub async fn record_write(&self, key: &str) -> Result<Position> {
        self.record(key, None).await
    }

    /// [`record_write`](Self::record_write) bounded by a caller deadline
    pub async fn record_write_before(&self, key: &str, deadline: Instant) -> Result<Position> {
        self.record(key, Some(deadline)).await
    }

    /// Pick a node to serve reads for `key`.
    ///
    /// Returns a standby that has replayed the key's watermark, or the
    /// primary when there is no watermark, no standby, or no standby has
    /// caught up. A failed probe aborts the selection; the remaining
    /// standbys are not tried and the primary is not substituted.
    pub async fn read_target(&self, key: &str) -> Result<&N> {
        self.select(key, None).await
    }

    /// [`read_target`](Self::read_target) bounded by a caller deadline
    pub async fn read_target_before(&self, key: &str, deadline: Instant) -> Result<&N> {
        self.select(key, Some(deadline)).await
    }

    /// Drop the watermark for `key`; later reads go to the primary
    pub async fn forget(&self, key: &str) -> Result<()> {
        self.bounded_store(None, self.store.delete(key)).await
    }

    /// Release the primary and every standby.
    ///
    /// In-flight calls must have finished before this is called.
    pub async fn close(self) {
        tracing::info!("Closing primary and {} standby(s)", self.standbys.len());
        self.primary.close().await;
        futures::future::join_all(self.standbys.iter().map(|node| node.close())).await;
    }

    async fn record(&self, key: &str, deadline: Option<Instant>) -> Result<Position> {
        let position = self
            .bounded_query(&self.primary, deadline, self.primary.current_write_position())
            .await?;

        self.bounded_store(deadline, self.store.set(key, &position))
            .await?;

        tracing::debug!("Recorded watermark {} for key {}", position, key);
        Ok(position)
    }

    async fn select(&self, key: &str, deadline: Option<Instant>) -> Result<&N> {
        if self.standbys.is_empty() {
            return Ok(&self.primary);
        }

        let watermark = match self.bounded_store(deadline, self.store.get(key)).await? {
            Some(position) => position,
            None => {
                tracing::debug!("No watermark for key {}, routing to primary", key);
                return Ok(&self.primary);
            }
        };

        let count = self.standbys.len();
        let start = rand::thread_rng().gen_range(0..count);

        for offset in 0..count {
            let standby = &self.standbys[(start + offset) % count];

            let reached = self
                .bounded_query(standby, deadline, standby.has_replayed_at_least(&watermark))
                .await
                .map_err(|e| {
                    tracing::warn!(
                        "Catch-up probe on {} failed for key {}: {}",
                        standby.name(),
                        key,
                        e
                    );
                    e
                })?;

            tracing::trace!(
                "{} {} watermark {}",
                standby.name(),
                if reached { "reached" } else { "is behind" },
                watermark
            );

            if reached {
                return Ok(standby);
            }
        }

        tracing::debug!(
            "No standby has replayed {} for key {}, routing to primary",
            watermark,
            key
        );
        Ok(&self.primary)
    }

    /// Run a node query within the timeout budget
    async fn bounded_query<T>(
        &self,
        node: &N,
        deadline: Option<Instant>,
        query: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let budget = budget(self.query_timeout, deadline);
        let timed_out = || Error::QueryTimeout {
            node: node.name().to_string(),
            timeout_ms: millis(budget),
        };

        if budget.is_zero() {
            return Err(timed_out());
        }

        tokio::time::timeout(budget, query)
            .await
            .unwrap_or_else(|_| Err(timed_out()))
    }

    /// Run a store operation within the timeout budget
    async fn bounded_store<T>(
        &self,
        deadline: Option<Instant>,
        op: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let budget = budget(self.query_timeout, deadline);
        let timed_out = || Error::Store(format!("timed out after {} ms", millis(budget)));

        if budget.is_zero() {
            return Err(timed_out());
        }

        tokio::time::timeout(budget, op)
            .await
            .unwrap_or_else(|_| Err(timed_out()))
    }
}

/// Time allowed for one round trip: the ceiling, cut short by the deadline
fn budget(ceiling: Duration, deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => ceiling.min(deadline.saturating_duration_since(Instant::now())),
        None => ceiling,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
