use std::time::{Duration, Instant};

use tally_log::LogError;
use tally_statsd::metric;
use tally_system::{Clock, Service, ShutdownHandle};
use tokio::time::MissedTickBehavior;

use crate::statsd::{ServerCounters, ServerTimers};
use crate::store::{RawLogStore, SqliteStoreError};

/// Periodically deletes raw events older than the retention.
///
/// The cutoff is computed from the clock on every run, so a run always removes everything that
/// expired since the previous one. A failed run is logged and retried on the next tick.
pub struct PurgeService<C> {
    store: RawLogStore,
    clock: C,
    retention: Duration,
    interval: Duration,
    shutdown: ShutdownHandle,
}

impl<C: Clock> PurgeService<C> {
    /// Creates a purge of events older than `retention`, running every `interval`.
    pub fn new(
        store: RawLogStore,
        clock: C,
        retention: Duration,
        interval: Duration,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            store,
            clock,
            retention,
            interval,
            shutdown,
        }
    }

    /// Runs a single purge and returns the number of deleted events.
    pub async fn run_once(&self) -> Result<u64, SqliteStoreError> {
        let start = Instant::now();
        let retention = i64::try_from(self.retention.as_secs()).unwrap_or(i64::MAX);
        let cutoff = self.clock.now().timestamp().saturating_sub(retention);

        let result = self.store.purge(cutoff).await;
        metric!(timer(ServerTimers::PurgeDuration) = start.elapsed());

        match &result {
            Ok(deleted) => {
                metric!(counter(ServerCounters::RawEventsPurged) += *deleted as i64);
                tally_log::info!(cutoff, deleted, "purged expired raw events");
            }
            Err(error) => {
                metric!(counter(ServerCounters::PurgeFailed) += 1);
                tally_log::error!("failed to purge raw events: {}", LogError(error));
            }
        }

        result
    }
}

impl<C: Clock> Service for PurgeService<C> {
    async fn run(mut self) {
        tally_log::info!(interval = ?self.interval, "raw log purge started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,
                _ = ticker.tick() => (),
            }

            let _ = self.run_once().await;
        }

        tally_log::info!("raw log purge stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};
    use tally_event::Event;
    use tally_system::{Controller, FixedClock, ShutdownMode};

    use super::*;

    const NOW: i64 = 1709640000;

    fn event(timestamp: i64) -> Event {
        Event {
            username: "alice".to_owned(),
            metric: "login".to_owned(),
            count: 1,
            timestamp,
        }
    }

    async fn seeded_store(dir: &tempfile::TempDir) -> RawLogStore {
        let store = RawLogStore::open(&dir.path().join("raw_log.db"))
            .await
            .unwrap();
        for age in [7200, 3601, 3600, 10] {
            store.insert(&event(NOW - age)).await.unwrap();
        }
        store
    }

    fn clock() -> FixedClock {
        FixedClock::new(Utc.timestamp_opt(NOW, 0).unwrap())
    }

    #[tokio::test]
    async fn test_purges_events_older_than_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let controller = Controller::new(Duration::from_secs(1));

        let purge = PurgeService::new(
            store.clone(),
            clock(),
            Duration::from_secs(3600),
            Duration::from_secs(1800),
            controller.shutdown_handle(),
        );

        assert_eq!(purge.run_once().await.unwrap(), 2);
        assert_eq!(purge.run_once().await.unwrap(), 0);
        assert_eq!(store.totals(0).await.unwrap()[0].events, 2);
    }

    #[tokio::test]
    async fn test_cutoff_follows_clock() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let controller = Controller::new(Duration::from_secs(1));
        let clock = clock();

        let purge = PurgeService::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(1800),
            controller.shutdown_handle(),
        );

        assert_eq!(purge.run_once().await.unwrap(), 2);
        clock.advance(TimeDelta::hours(1));
        assert_eq!(purge.run_once().await.unwrap(), 2);
        assert!(store.totals(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_service_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let controller = Controller::new(Duration::from_secs(1));

        let purge = PurgeService::new(
            store.clone(),
            clock(),
            Duration::from_secs(3600),
            Duration::from_secs(1800),
            controller.shutdown_handle(),
        );

        let handle = purge.start();

        // The first tick completes immediately.
        let mut attempts = 0;
        while store.totals(0).await.unwrap()[0].events != 2 {
            attempts += 1;
            assert!(attempts < 100, "purge did not run");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        controller.shutdown(ShutdownMode::Graceful);
        handle.await.unwrap();
    }
}
