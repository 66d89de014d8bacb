//! stickyroute Error Types

use thiserror::Error;

/// Result type alias for stickyroute operations
pub type Result<T> = std::result::Result<T, Error>;

/// stickyroute error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Connection errors (startup only)
    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    // Query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query against {node} timed out after {timeout_ms} ms")]
    QueryTimeout { node: String, timeout_ms: u64 },

    // Replication-state errors
    #[error("Node {0} is not in recovery mode; expected a standby")]
    NotInRecovery(String),

    // Watermark store errors
    #[error("Watermark store error: {0}")]
    Store(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if retrying the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::QueryTimeout { .. } | Error::Store(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Check if this error points at cluster or configuration mistakes
    /// rather than transient lag or faults
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Error::NotInRecovery(_) | Error::Config(_) | Error::ConfigParse(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(format!("SQLite error: {}", e))
    }
}
