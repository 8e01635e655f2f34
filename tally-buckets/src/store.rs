use std::collections::BTreeMap;
use std::future::Future;

use tally_redis::RedisError;
use thiserror::Error;

use crate::key::{DailyKey, MonthlyKey};

/// Metric counters of a single bucket, keyed by metric name.
pub type Counters = BTreeMap<String, i64>;

/// An error returned by a [`BucketStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A guarded key was modified between the guard and its commit.
    #[error("guarded key was modified concurrently")]
    Conflict,

    /// A counter holds a value that is not an integer.
    #[error("invalid counter {field:?} in {key:?}")]
    InvalidCounter {
        /// The bucket key.
        key: String,
        /// The metric name.
        field: String,
    },

    /// Communication with redis failed.
    #[error("failed to access the bucket store")]
    Redis(#[from] RedisError),
}

impl StoreError {
    /// Returns `true` if retrying the operation later may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidCounter { .. })
    }
}

/// A single write of a [`WriteBatch`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WriteOp {
    /// Adds `delta` to the counter `field` of the hash at `key`.
    IncrBy {
        /// The bucket key.
        key: String,
        /// The metric name.
        field: String,
        /// The amount to add.
        delta: i64,
    },
    /// Deletes `key`.
    Delete {
        /// The key to delete.
        key: String,
    },
    /// Sets the string at `key` to `value`.
    Set {
        /// The key to write.
        key: String,
        /// The new value.
        value: String,
    },
}

/// Writes that are applied atomically when a [`Guard`] commits.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an increment of a hash field.
    pub fn incr_by(&mut self, key: impl Into<String>, field: impl Into<String>, delta: i64) {
        self.ops.push(WriteOp::IncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        });
    }

    /// Appends a deletion.
    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    /// Appends a string write.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.ops.push(WriteOp::Set {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Returns `true` if the batch contains no writes.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the writes in the order they are applied.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

/// A store of time-bucketed metric counters.
///
/// Daily buckets are hashes mapping metric names to counters. The same store holds the
/// consolidation watermark as a plain string key.
pub trait BucketStore: Send + Sync {
    /// The guard returned by [`guard`](Self::guard).
    type Guard: Guard;

    /// Atomically increments the counter of `metric` in bucket `key` by one.
    ///
    /// Returns the counter value after the increment.
    fn increment(
        &self,
        key: &str,
        metric: &str,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Reads all counters of bucket `key`. A missing bucket is empty.
    fn read_all(&self, key: &str) -> impl Future<Output = Result<Counters, StoreError>> + Send;

    /// Reads the string value at `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Starts watching `keys` for concurrent modification.
    ///
    /// The returned guard must be committed for its writes to be applied. Dropping it releases
    /// the watch without writing.
    fn guard(&self, keys: &[String])
    -> impl Future<Output = Result<Self::Guard, StoreError>> + Send;
}

/// An optimistic guard over a set of keys.
pub trait Guard: Send {
    /// Reads the string value at `key`.
    fn get(&mut self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Reads all counters of bucket `key`.
    fn read_all(&mut self, key: &str) -> impl Future<Output = Result<Counters, StoreError>> + Send;

    /// Applies `batch` atomically.
    ///
    /// Fails with [`StoreError::Conflict`] and writes nothing if any guarded key was modified
    /// since the guard was taken. An empty batch only releases the guard.
    fn commit(self, batch: WriteBatch) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// The result of [`merge_and_delete`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MergeOutcome {
    /// The daily bucket did not exist or held no counters. Nothing was written.
    Empty,
    /// The counters were added to the monthly bucket and the daily bucket was deleted.
    Merged(Counters),
}

/// Adds all counters of a daily bucket into its monthly bucket and deletes the daily bucket.
///
/// Both writes are committed as one atomic batch under a guard on both keys, so a merged day is
/// never counted twice. Merging a day that is already gone is a no-op.
pub async fn merge_and_delete<S>(
    store: &S,
    daily: &DailyKey,
    monthly: &MonthlyKey,
) -> Result<MergeOutcome, StoreError>
where
    S: BucketStore,
{
    let daily = daily.to_string();
    let monthly = monthly.to_string();

    let mut guard = store.guard(&[daily.clone(), monthly.clone()]).await?;
    let counters = guard.read_all(&daily).await?;

    if counters.is_empty() {
        guard.commit(WriteBatch::new()).await?;
        return Ok(MergeOutcome::Empty);
    }

    let mut batch = WriteBatch::new();
    for (metric, count) in &counters {
        batch.incr_by(&monthly, metric, *count);
    }
    batch.delete(&daily);
    guard.commit(batch).await?;

    Ok(MergeOutcome::Merged(counters))
}
