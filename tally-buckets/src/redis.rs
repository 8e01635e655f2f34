use std::collections::HashMap;

use tally_redis::redis::{self, Pipeline};
use tally_redis::{AsyncRedisConnection, AsyncRedisPool, RedisError};

use crate::store::{BucketStore, Counters, Guard, StoreError, WriteBatch, WriteOp};

/// A [`BucketStore`] backed by redis hashes.
#[derive(Clone, Debug)]
pub struct RedisBucketStore {
    pool: AsyncRedisPool,
}

impl RedisBucketStore {
    /// Creates a store on top of the given connection pool.
    pub fn new(pool: AsyncRedisPool) -> Self {
        Self { pool }
    }
}

impl BucketStore for RedisBucketStore {
    type Guard = RedisGuard;

    async fn increment(&self, key: &str, metric: &str) -> Result<i64, StoreError> {
        let mut connection = self.pool.get_connection().await?;
        let value = redis::cmd("HINCRBY")
            .arg(key)
            .arg(metric)
            .arg(1)
            .query_async(&mut connection)
            .await
            .map_err(|error| increment_error(key, metric, error))?;
        Ok(value)
    }

    async fn read_all(&self, key: &str) -> Result<Counters, StoreError> {
        let mut connection = self.pool.get_connection().await?;
        hgetall(&mut connection, key).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut connection = self.pool.get_connection().await?;
        get(&mut connection, key).await
    }

    async fn guard(&self, keys: &[String]) -> Result<RedisGuard, StoreError> {
        let connection = self.pool.get_connection().await?;

        // From here on the connection carries watch state and must not go back to the pool
        // unless the watch was released.
        let mut guard = RedisGuard {
            connection: Some(connection),
        };

        if !keys.is_empty() {
            redis::cmd("WATCH")
                .arg(keys)
                .query_async::<()>(guard.connection()?)
                .await
                .map_err(RedisError::Redis)?;
        }

        Ok(guard)
    }
}

/// A `WATCH` held on a dedicated pooled connection.
///
/// Committing runs the batch in `MULTI`/`EXEC`, which redis aborts if a watched key changed.
/// A guard dropped without commit detaches its connection from the pool, which closes it and
/// discards the watch.
pub struct RedisGuard {
    connection: Option<AsyncRedisConnection>,
}

impl RedisGuard {
    fn connection(&mut self) -> Result<&mut AsyncRedisConnection, StoreError> {
        // Only `commit` takes the connection, and it consumes the guard.
        self.connection.as_mut().ok_or_else(|| {
            let error = redis::RedisError::from((
                redis::ErrorKind::ClientError,
                "guard already released",
            ));
            StoreError::Redis(RedisError::Redis(error))
        })
    }
}

impl Guard for RedisGuard {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        get(self.connection()?, key).await
    }

    async fn read_all(&mut self, key: &str) -> Result<Counters, StoreError> {
        hgetall(self.connection()?, key).await
    }

    async fn commit(mut self, batch: WriteBatch) -> Result<(), StoreError> {
        let connection = self.connection()?;

        if batch.is_empty() {
            redis::cmd("UNWATCH")
                .query_async::<()>(connection)
                .await
                .map_err(RedisError::Redis)?;
        } else {
            // `EXEC` replies with nil when the transaction was aborted.
            let applied: Option<()> = pipeline(&batch)
                .query_async(connection)
                .await
                .map_err(RedisError::Redis)?;

            if applied.is_none() {
                return Err(StoreError::Conflict);
            }
        }

        // The watch is released, the connection may be reused.
        drop(self.connection.take());
        Ok(())
    }
}

impl Drop for RedisGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            drop(AsyncRedisConnection::take(connection));
        }
    }
}

/// Classifies a failed `HINCRBY`.
///
/// A key holding another type, a non-integer field or an overflowing counter will fail again on
/// every retry and is reported as an invalid counter.
fn increment_error(key: &str, metric: &str, error: redis::RedisError) -> StoreError {
    let permanent = matches!(
        error.kind(),
        redis::ErrorKind::TypeError | redis::ErrorKind::ResponseError
    ) || error.code() == Some("WRONGTYPE");

    if permanent {
        StoreError::InvalidCounter {
            key: key.to_owned(),
            field: metric.to_owned(),
        }
    } else {
        StoreError::Redis(RedisError::Redis(error))
    }
}

fn pipeline(batch: &WriteBatch) -> Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();

    for op in batch.ops() {
        match op {
            WriteOp::IncrBy { key, field, delta } => {
                pipe.cmd("HINCRBY").arg(key).arg(field).arg(*delta).ignore();
            }
            WriteOp::Delete { key } => {
                pipe.cmd("DEL").arg(key).ignore();
            }
            WriteOp::Set { key, value } => {
                pipe.cmd("SET").arg(key).arg(value).ignore();
            }
        }
    }

    pipe
}

async fn get(
    connection: &mut AsyncRedisConnection,
    key: &str,
) -> Result<Option<String>, StoreError> {
    let value = redis::cmd("GET")
        .arg(key)
        .query_async(connection)
        .await
        .map_err(RedisError::Redis)?;
    Ok(value)
}

async fn hgetall(
    connection: &mut AsyncRedisConnection,
    key: &str,
) -> Result<Counters, StoreError> {
    let fields: HashMap<String, String> = redis::cmd("HGETALL")
        .arg(key)
        .query_async(connection)
        .await
        .map_err(RedisError::Redis)?;

    fields
        .into_iter()
        .map(|(field, value)| match value.parse() {
            Ok(count) => Ok((field, count)),
            Err(_) => Err(StoreError::InvalidCounter {
                key: key.to_owned(),
                field,
            }),
        })
        .collect()
}
