//! State Store Port (Driven Port)
//!
//! Key-value store with expiry plus topic publish. Redis in production.

use std::time::Duration;

use async_trait::async_trait;

/// State store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached.
    #[error("store connection error: {message}")]
    Connection {
        /// Error detail.
        message: String,
    },

    /// A command was rejected or failed.
    #[error("store command {command} failed: {message}")]
    Command {
        /// Command name (`SET`, `PUBLISH`).
        command: &'static str,
        /// Error detail.
        message: String,
    },

    /// A value could not be serialized.
    #[error("store serialization error: {message}")]
    Serialization {
        /// Error detail.
        message: String,
    },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Port for exporting cache state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&mut self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Publish `message` on `topic`.
    async fn publish(&mut self, topic: &str, message: Vec<u8>) -> Result<(), StoreError>;
}
