//! PostgreSQL Node
//!
//! Position queries backed by an sqlx connection pool.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use super::{Position, PositionSource};
use crate::config::ClusterConfig;
use crate::error::{Error, Result};

/// Pool settings applied to every node
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum connections per node
    pub max_connections: u32,
    /// How long to wait for a connection
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ClusterConfig> for PoolSettings {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            max_connections: config.pool_size,
            acquire_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

/// A PostgreSQL primary or standby
pub struct PgNode {
    /// host:port label
    name: String,
    /// Connection pool
    pool: PgPool,
}

impl PgNode {
    /// Connect to a node and make sure it answers
    pub async fn connect(dsn: &str, settings: &PoolSettings) -> Result<Self> {
        let options = PgConnectOptions::from_str(dsn)
            .map_err(|e| Error::Config(format!("Invalid connection string: {}", e)))?;
        let name = format!("{}:{}", options.get_host(), options.get_port());

        tracing::debug!("Connecting to {}", name);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| Error::ConnectionFailed {
                address: name.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(Error::ConnectionFailed {
                address: name,
                reason: format!("health check failed: {}", e),
            });
        }

        tracing::info!("Connected to {}", name);
        Ok(Self { name, pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    /// Get the underlying pool for running application queries
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Whether the node is replaying WAL (i.e. acting as a standby)
    pub async fn in_recovery(&self) -> Result<bool> {
        let in_recovery: bool = sqlx::query_scalar("SELECT pg_is_in_recovery()")
            .fetch_one(&self.pool)
            .await?;
        Ok(in_recovery)
    }
}

#[async_trait::async_trait]
impl PositionSource for PgNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn current_write_position(&self) -> Result<Position> {
        let lsn: String = sqlx::query_scalar("SELECT pg_current_wal_lsn()::text")
            .fetch_one(&self.pool)
            .await?;
        Ok(Position::from(lsn))
    }

    async fn has_replayed_at_least(&self, position: &Position) -> Result<bool> {
        // NULL when the server is not in recovery
        let reached: Option<bool> =
            sqlx::query_scalar("SELECT pg_last_wal_replay_lsn() >= $1::pg_lsn")
                .bind(position.as_str())
                .fetch_one(&self.pool)
                .await?;

        reached.ok_or_else(|| Error::NotInRecovery(self.name.clone()))
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Closed pool for {}", self.name);
    }
}
