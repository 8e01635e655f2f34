use std::fmt;
use std::time::Duration;

use deadpool::managed::{BuildError, PoolError};
use deadpool_redis::{Config as SingleConfig, ConfigError, Pool as SinglePool, Runtime};
use thiserror::Error;

use crate::config::{RedisConfig, RedisConfigOptions};

pub use deadpool_redis::redis;

/// A pooled connection to the Redis instance.
///
/// The connection is returned to the pool when dropped. Use
/// [`deadpool_redis::Connection::take`] to detach it from the pool instead, e.g. when it carries
/// per-connection state such as an active `WATCH`.
pub type AsyncRedisConnection = deadpool_redis::Connection;

/// An error type that represents various failure modes when interacting with Redis.
#[derive(Debug, Error)]
pub enum RedisError {
    /// An error that occurs during communication with Redis.
    #[error("failed to communicate with redis: {0}")]
    Redis(#[source] redis::RedisError),

    /// An error that occurs when interacting with the Redis connection pool.
    #[error("failed to interact with the redis pool: {0}")]
    Pool(#[source] PoolError<redis::RedisError>),

    /// An error that occurs when creating a Redis connection pool.
    #[error("failed to create redis pool: {0}")]
    CreatePool(#[from] BuildError),

    /// An error that occurs when configuring Redis.
    #[error("failed to configure redis: {0}")]
    ConfigError(#[from] ConfigError),
}

impl From<redis::RedisError> for RedisError {
    fn from(error: redis::RedisError) -> Self {
        Self::Redis(error)
    }
}

/// Statistics about the Redis client's connection pool state.
#[derive(Debug)]
pub struct RedisClientStats {
    /// The number of connections currently being managed by the pool.
    pub connections: u32,
    /// The number of idle connections.
    pub idle_connections: u32,
}

/// A connection pool for a single Redis instance.
#[derive(Clone)]
pub struct AsyncRedisPool {
    pool: SinglePool,
}

impl AsyncRedisPool {
    /// Creates a new connection pool for a single Redis instance.
    ///
    /// No connection is opened until the first call to [`get_connection`](Self::get_connection).
    pub fn single(server: &str, opts: &RedisConfigOptions) -> Result<Self, RedisError> {
        let timeout = Some(Duration::from_secs(opts.connection_timeout));
        let pool = SingleConfig::from_url(server)
            .builder()?
            .max_size(opts.max_connections as usize)
            .wait_timeout(timeout)
            .create_timeout(timeout)
            .runtime(Runtime::Tokio1)
            .build()?;

        Ok(Self { pool })
    }

    /// Creates a new connection pool from the configuration.
    pub fn from_config(config: &RedisConfig) -> Result<Self, RedisError> {
        Self::single(config.server(), &config.options())
    }

    /// Acquires a connection from the pool.
    pub async fn get_connection(&self) -> Result<AsyncRedisConnection, RedisError> {
        self.pool.get().await.map_err(RedisError::Pool)
    }

    /// Sends a `PING` to verify that the server is reachable.
    pub async fn ping(&self) -> Result<(), RedisError> {
        let mut connection = self.get_connection().await?;
        redis::cmd("PING")
            .query_async::<()>(&mut connection)
            .await
            .map_err(RedisError::Redis)
    }

    /// Returns statistics about the current state of the connection pool.
    pub fn stats(&self) -> RedisClientStats {
        let status = self.pool.status();

        RedisClientStats {
            idle_connections: status.available as u32,
            connections: status.size as u32,
        }
    }
}

impl fmt::Debug for AsyncRedisPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.pool.status();
        f.debug_struct("AsyncRedisPool")
            .field("max_size", &status.max_size)
            .field("size", &status.size)
            .finish()
    }
}
