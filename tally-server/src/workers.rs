//! Event handlers of the first-seen and raw-log workers.

use tally_consumer::{ConsumeError, EventHandler};
use tally_event::Event;
use tally_statsd::metric;

use crate::statsd::ServerCounters;
use crate::store::{FirstSeenStore, RawLogStore};

/// Records the first event of every user.
#[derive(Debug)]
pub struct FirstSeenHandler {
    store: FirstSeenStore,
}

impl FirstSeenHandler {
    /// Creates a handler writing to `store`.
    pub fn new(store: FirstSeenStore) -> Self {
        Self { store }
    }
}

impl EventHandler for FirstSeenHandler {
    async fn handle(&self, event: &Event) -> Result<(), ConsumeError> {
        let new = self
            .store
            .record(event)
            .await
            .map_err(ConsumeError::transient)?;

        if new {
            metric!(counter(ServerCounters::NewUser) += 1);
            tally_log::info!(username = %event.username, metric = %event.metric, "new user seen");
        }

        Ok(())
    }
}

/// Appends every event to the raw log.
#[derive(Debug)]
pub struct RawLogHandler {
    store: RawLogStore,
}

impl RawLogHandler {
    /// Creates a handler writing to `store`.
    pub fn new(store: RawLogStore) -> Self {
        Self { store }
    }
}

impl EventHandler for RawLogHandler {
    async fn handle(&self, event: &Event) -> Result<(), ConsumeError> {
        self.store
            .insert(event)
            .await
            .map_err(ConsumeError::transient)?;

        metric!(counter(ServerCounters::RawEventRecorded) += 1);
        tally_log::trace!(username = %event.username, metric = %event.metric, "recorded raw event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tally_consumer::{MemoryQueue, Outcome, Settlement, consume};

    use super::*;

    fn event(username: &str) -> Event {
        Event {
            username: username.to_owned(),
            metric: "login".to_owned(),
            count: 1,
            timestamp: 1709640000,
        }
    }

    #[tokio::test]
    async fn test_first_seen_acks_known_users() {
        tally_log::init_test!();

        let dir = tempfile::tempdir().unwrap();
        let store = FirstSeenStore::open(&dir.path().join("first_seen.db"))
            .await
            .unwrap();
        let handler = FirstSeenHandler::new(store.clone());

        let queue = MemoryQueue::new();
        let first = queue.publish_event(&event("alice"));
        let second = queue.publish_event(&event("alice"));

        while let Some(delivery) = queue.pop() {
            assert_eq!(consume(delivery, &handler).await.unwrap(), Outcome::Acked);
        }

        assert_eq!(queue.settlement(first), Some(Settlement::Acked));
        assert_eq!(queue.settlement(second), Some(Settlement::Acked));
        assert_eq!(store.get("alice").await.unwrap().unwrap().timestamp, 1709640000);
    }

    #[tokio::test]
    async fn test_raw_log_records_every_event() {
        let dir = tempfile::tempdir().unwrap();
        let store = RawLogStore::open(&dir.path().join("raw_log.db"))
            .await
            .unwrap();
        let handler = RawLogHandler::new(store.clone());

        handler.handle(&event("alice")).await.unwrap();
        handler.handle(&event("alice")).await.unwrap();
        handler.handle(&event("bob")).await.unwrap();

        let totals = store.totals(0).await.unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].events, 3);
    }
}
