//! Redis state store.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::application::ports::{StateStore, StoreError};

/// [`StateStore`] backed by a Redis connection manager.
///
/// The manager is created on the first command, so an unreachable server
/// fails that command with [`StoreError::Connection`] and the session's
/// retry loop takes over. Once created, the manager reconnects on its own.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    connection: Option<ConnectionManager>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Parse `url` (`redis://host:port/db`). No connection is opened yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the URL is invalid.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(connection_error)?;
        Ok(Self {
            client,
            connection: None,
        })
    }

    /// Whether the connection manager has been created.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn connection(&mut self) -> Result<&mut ConnectionManager, StoreError> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let connection = self
                    .client
                    .get_connection_manager()
                    .await
                    .map_err(connection_error)?;
                tracing::info!("Connected to Redis");
                connection
            }
        };
        Ok(self.connection.insert(connection))
    }
}

fn connection_error(err: redis::RedisError) -> StoreError {
    StoreError::Connection {
        message: err.to_string(),
    }
}

fn command_error(command: &'static str) -> impl FnOnce(redis::RedisError) -> StoreError {
    move |err| StoreError::Command {
        command,
        message: err.to_string(),
    }
}

/// Expiry in whole seconds, truncated. Redis rejects `EX 0`, so anything
/// under a second becomes 1.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl StateStore for RedisStore {
    async fn set(&mut self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let (): () = self
            .connection()
            .await?
            .set_ex(key, value, ttl_seconds(ttl))
            .await
            .map_err(command_error("SET"))?;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, message: Vec<u8>) -> Result<(), StoreError> {
        let _receivers: i64 = self
            .connection()
            .await?
            .publish(topic, message)
            .await
            .map_err(command_error("PUBLISH"))?;
        Ok(())
    }
}
