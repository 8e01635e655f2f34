use tally_consumer::{ConsumeError, EventHandler};
use tally_event::Event;
use tally_statsd::metric;
use thiserror::Error;

use crate::key::DailyKey;
use crate::statsd::BucketCounters;
use crate::store::BucketStore;

/// The event timestamp has no calendar date.
#[derive(Debug, Error)]
#[error("timestamp {0} is out of range")]
pub struct InvalidTimestamp(pub i64);

/// Counts events per metric into the daily bucket of their timestamp.
///
/// Every event increments its metric by one, regardless of its `count`.
#[derive(Debug)]
pub struct DistinctHandler<S> {
    store: S,
    prefix: String,
}

impl<S: BucketStore> DistinctHandler<S> {
    /// Creates a handler writing buckets with the given key prefix.
    pub fn new(store: S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }
}

impl<S: BucketStore> EventHandler for DistinctHandler<S> {
    async fn handle(&self, event: &Event) -> Result<(), ConsumeError> {
        let key = DailyKey::from_timestamp(self.prefix.as_str(), event.timestamp)
            .ok_or_else(|| ConsumeError::permanent(InvalidTimestamp(event.timestamp)))?;

        match self.store.increment(&key.to_string(), &event.metric).await {
            Ok(count) => {
                tally_log::trace!(bucket = %key, metric = %event.metric, count, "counted event");
                metric!(counter(BucketCounters::EventCounted) += 1);
                Ok(())
            }
            Err(error) if error.is_transient() => Err(ConsumeError::transient(error)),
            Err(error) => Err(ConsumeError::permanent(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tally_consumer::{MemoryQueue, Outcome, RejectReason, Settlement, consume};
    use tally_redis::RedisError;
    use tally_redis::redis::{self, ErrorKind};

    use super::*;
    use crate::{Counters, MemoryBucketStore, MemoryGuard, StoreError};

    fn event(metric: &str, count: i64) -> Event {
        Event {
            username: "alice".to_owned(),
            metric: metric.to_owned(),
            count,
            // 2024-03-05T12:00:00Z
            timestamp: 1709640000,
        }
    }

    #[tokio::test]
    async fn test_counts_per_day_and_metric() {
        let store = MemoryBucketStore::new();
        let handler = DistinctHandler::new(store.clone(), "p");

        for _ in 0..3 {
            handler.handle(&event("login", 1)).await.unwrap();
        }
        handler.handle(&event("logout", 1)).await.unwrap();

        assert_eq!(
            store.read_all("p:2024:03:05").await.unwrap(),
            Counters::from([("login".to_owned(), 3), ("logout".to_owned(), 1)])
        );
    }

    #[tokio::test]
    async fn test_ignores_count() {
        let store = MemoryBucketStore::new();
        let handler = DistinctHandler::new(store.clone(), "p");

        handler.handle(&event("login", 42)).await.unwrap();

        assert_eq!(store.read_all("p:2024:03:05").await.unwrap()["login"], 1);
    }

    #[tokio::test]
    async fn test_invalid_timestamp_is_permanent() {
        let handler = DistinctHandler::new(MemoryBucketStore::new(), "p");
        let mut event = event("login", 1);
        event.timestamp = i64::MAX;

        let error = handler.handle(&event).await.unwrap_err();
        assert!(!error.requeue());
    }

    #[tokio::test]
    async fn test_invalid_counter_is_permanent() {
        let store = MemoryBucketStore::new();
        store.insert_raw("p:2024:03:05", "login", "many");
        let handler = DistinctHandler::new(store, "p");

        let error = handler.handle(&event("login", 1)).await.unwrap_err();
        assert!(!error.requeue());
    }

    /// A store that can be taken offline.
    #[derive(Clone, Default)]
    struct Unreliable {
        inner: MemoryBucketStore,
        down: std::sync::Arc<AtomicBool>,
    }

    impl Unreliable {
        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                let error = redis::RedisError::from((ErrorKind::IoError, "connection refused"));
                return Err(StoreError::Redis(RedisError::Redis(error)));
            }
            Ok(())
        }
    }

    impl BucketStore for Unreliable {
        type Guard = MemoryGuard;

        async fn increment(&self, key: &str, metric: &str) -> Result<i64, StoreError> {
            self.check()?;
            self.inner.increment(key, metric).await
        }

        async fn read_all(&self, key: &str) -> Result<Counters, StoreError> {
            self.check()?;
            self.inner.read_all(key).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn guard(&self, keys: &[String]) -> Result<MemoryGuard, StoreError> {
            self.check()?;
            self.inner.guard(keys).await
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_requeues() {
        let store = Unreliable::default();
        let handler = DistinctHandler::new(store.clone(), "p");
        let queue = MemoryQueue::new();
        let tag = queue.publish_event(&event("login", 1));

        store.down.store(true, Ordering::SeqCst);
        let outcome = consume(queue.pop().unwrap(), &handler).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Rejected {
                requeue: true,
                reason: RejectReason::Handler,
            }
        );
        assert!(store.inner.read_all("p:2024:03:05").await.unwrap().is_empty());

        store.down.store(false, Ordering::SeqCst);
        let outcome = consume(queue.pop().unwrap(), &handler).await.unwrap();
        assert_eq!(outcome, Outcome::Acked);

        assert_eq!(
            queue.settlements(),
            [(tag, Settlement::Requeued), (tag, Settlement::Acked)]
        );
        assert_eq!(
            store.inner.read_all("p:2024:03:05").await.unwrap()["login"],
            1
        );
    }

    #[tokio::test]
    async fn test_duplicate_deliveries_are_counted() {
        let store = MemoryBucketStore::new();
        let handler = DistinctHandler::new(store.clone(), "p");
        let queue = MemoryQueue::new();

        // At-least-once delivery: the broker hands out the same event twice.
        queue.publish_event(&event("login", 1));
        queue.publish_event(&event("login", 1));
        while let Some(delivery) = queue.pop() {
            consume(delivery, &handler).await.unwrap();
        }

        assert_eq!(store.read_all("p:2024:03:05").await.unwrap()["login"], 2);
    }
}
