use std::slice;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tally_log::LogError;
use tally_statsd::metric;
use tally_system::{Clock, Service, ShutdownHandle};
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::key::{DEFAULT_PREFIX, DailyKey, watermark_key};
use crate::statsd::{BucketCounters, BucketGauges, BucketTimers};
use crate::store::{BucketStore, Guard, MergeOutcome, StoreError, WriteBatch, merge_and_delete};
use crate::watermark::{self, InvalidWatermark};

/// Settings for consolidating daily buckets into monthly buckets.
#[derive(Clone, Debug)]
pub struct ConsolidationConfig {
    /// Prefix of all bucket keys and of the watermark key.
    pub prefix: String,
    /// Number of days a daily bucket is kept before it is consolidated.
    pub retention_days: u32,
    /// Time between two consolidation cycles.
    pub interval: Duration,
    /// Maximum number of days consolidated in a single cycle.
    pub max_days_per_cycle: u32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_owned(),
            retention_days: 30,
            interval: Duration::from_secs(24 * 60 * 60),
            max_days_per_cycle: 366,
        }
    }
}

/// A consolidation cycle failed.
///
/// Days merged before the failure stay merged. The watermark is only advanced past them by a
/// later cycle, which finds them empty.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    /// The bucket store failed or the watermark was modified concurrently.
    #[error("failed to consolidate buckets")]
    Store(#[from] StoreError),
    /// The persisted watermark is not a date.
    #[error(transparent)]
    InvalidWatermark(#[from] InvalidWatermark),
    /// Date arithmetic left the supported calendar range.
    #[error("date out of range")]
    OutOfRange,
}

impl ConsolidationError {
    /// Returns `true` if another consolidator advanced the watermark during this cycle.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict))
    }
}

/// The result of a successful consolidation cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CycleReport {
    /// There was no watermark yet. It was set to the day before today.
    Initialized {
        /// The initial watermark.
        watermark: NaiveDate,
    },
    /// All days up to the retention threshold were already consolidated.
    UpToDate {
        /// The unchanged watermark.
        watermark: NaiveDate,
    },
    /// Days after `from` up to and including `to` were consolidated.
    Advanced {
        /// The previous watermark.
        from: NaiveDate,
        /// The new watermark.
        to: NaiveDate,
        /// Number of days whose counters were merged.
        merged: usize,
        /// Number of days without counters.
        empty: usize,
    },
}

/// Moves daily buckets older than the retention threshold into their monthly buckets.
///
/// The watermark records the last consolidated day. Each cycle holds a guard on the watermark
/// from reading it until writing its successor, so concurrent consolidators never overwrite each
/// other's progress. Days are consolidated in increasing order, each under its own guard.
#[derive(Debug)]
pub struct Consolidator<S, C> {
    store: S,
    clock: C,
    config: ConsolidationConfig,
}

impl<S, C> Consolidator<S, C>
where
    S: BucketStore,
    C: Clock,
{
    /// Creates a consolidator.
    pub fn new(store: S, clock: C, config: ConsolidationConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Returns the configuration of this consolidator.
    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Runs a single consolidation cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, ConsolidationError> {
        let key = watermark_key(&self.config.prefix);
        let today = self.clock.now().date_naive();

        let mut guard = self.store.guard(slice::from_ref(&key)).await?;

        let Some(raw) = guard.get(&key).await? else {
            let watermark = today
                .checked_sub_days(Days::new(1))
                .ok_or(ConsolidationError::OutOfRange)?;

            let mut batch = WriteBatch::new();
            batch.set(&key, watermark::format(watermark));
            guard.commit(batch).await?;

            return Ok(CycleReport::Initialized { watermark });
        };

        let from = watermark::parse(&raw)?;
        let limit = today
            .checked_sub_days(Days::new(u64::from(self.config.retention_days) + 1))
            .ok_or(ConsolidationError::OutOfRange)?;

        let mut current = from;
        let mut merged = 0;
        let mut empty = 0;

        while current < limit && merged + empty < self.config.max_days_per_cycle as usize {
            let day = current.succ_opt().ok_or(ConsolidationError::OutOfRange)?;
            let daily = DailyKey::new(self.config.prefix.as_str(), day);

            let outcome = match merge_and_delete(&self.store, &daily, &daily.monthly()).await? {
                MergeOutcome::Merged(counters) => {
                    tally_log::debug!(
                        bucket = %daily,
                        metrics = counters.len(),
                        "merged daily bucket"
                    );
                    merged += 1;
                    "merged"
                }
                MergeOutcome::Empty => {
                    empty += 1;
                    "empty"
                }
            };
            metric!(counter(BucketCounters::DaysConsolidated) += 1, outcome = outcome);

            current = day;
        }

        if current == from {
            guard.commit(WriteBatch::new()).await?;
            return Ok(CycleReport::UpToDate { watermark: from });
        }

        let mut batch = WriteBatch::new();
        batch.set(&key, watermark::format(current));
        guard.commit(batch).await?;

        Ok(CycleReport::Advanced {
            from,
            to: current,
            merged,
            empty,
        })
    }

    /// Runs a single cycle and reports its result through logs and metrics.
    pub async fn run_once(&self) -> Result<CycleReport, ConsolidationError> {
        let start = Instant::now();
        let result = self.run_cycle().await;
        metric!(timer(BucketTimers::ConsolidationCycle) = start.elapsed());

        match &result {
            Ok(CycleReport::Initialized { watermark }) => {
                tally_log::info!(%watermark, "initialized consolidation watermark");
            }
            Ok(CycleReport::UpToDate { watermark }) => {
                tally_log::debug!(%watermark, "consolidation is up to date");
            }
            Ok(CycleReport::Advanced {
                from,
                to,
                merged,
                empty,
            }) => {
                tally_log::info!(%from, %to, merged, empty, "consolidated daily buckets");
                let lag = (self.clock.now().date_naive() - *to).num_days().max(0);
                metric!(gauge(BucketGauges::WatermarkLag) = lag as u64);
            }
            Err(error) if error.is_conflict() => {
                metric!(counter(BucketCounters::ConsolidationConflict) += 1);
                tally_log::info!("consolidation deferred, watermark was advanced concurrently");
            }
            Err(error) => {
                metric!(counter(BucketCounters::ConsolidationFailed) += 1);
                tally_log::error!("consolidation failed: {}", LogError(error));
            }
        }

        result
    }
}

/// Runs consolidation cycles periodically until shutdown.
///
/// The first cycle runs right away. A cycle in flight when shutdown is requested is finished.
pub struct ConsolidationService<S, C> {
    consolidator: Consolidator<S, C>,
    shutdown: ShutdownHandle,
}

impl<S, C> ConsolidationService<S, C>
where
    S: BucketStore + 'static,
    C: Clock,
{
    /// Creates the service.
    pub fn new(consolidator: Consolidator<S, C>, shutdown: ShutdownHandle) -> Self {
        Self {
            consolidator,
            shutdown,
        }
    }
}

impl<S, C> Service for ConsolidationService<S, C>
where
    S: BucketStore + 'static,
    C: Clock,
{
    async fn run(mut self) {
        let interval = self.consolidator.config().interval;
        tally_log::info!(?interval, "consolidation started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,
                _ = ticker.tick() => (),
            }

            // Failures are reported by `run_once` and retried on the next tick.
            let _ = self.consolidator.run_once().await;
        }

        tally_log::info!("consolidation stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};
    use tally_system::{Controller, FixedClock, ShutdownMode};

    use super::*;
    use crate::{Counters, MemoryBucketStore, MemoryGuard};

    const WATERMARK: &str = "metrics-distinct:last-merge";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// 2024-02-05T12:00:00Z
    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2024, 2, 5, 12, 0, 0).unwrap())
    }

    /// Daily buckets for 2024-01-01 through 2024-01-05 with two logins each.
    async fn seeded_store() -> MemoryBucketStore {
        let store = MemoryBucketStore::new();
        for day in 1..=5 {
            let key = DailyKey::new(DEFAULT_PREFIX, date(2024, 1, day)).to_string();
            store.increment(&key, "login").await.unwrap();
            store.increment(&key, "login").await.unwrap();
        }
        store
    }

    fn consolidator<S: BucketStore>(store: S) -> Consolidator<S, FixedClock> {
        Consolidator::new(store, clock(), ConsolidationConfig::default())
    }

    #[tokio::test]
    async fn test_consolidates_old_days() {
        let store = seeded_store().await;
        store.set(WATERMARK, "2023-12-31");

        let report = consolidator(store.clone()).run_cycle().await.unwrap();

        assert_eq!(
            report,
            CycleReport::Advanced {
                from: date(2023, 12, 31),
                to: date(2024, 1, 5),
                merged: 5,
                empty: 0,
            }
        );
        assert_eq!(
            store.read_all("metrics-distinct:2024:01").await.unwrap(),
            Counters::from([("login".to_owned(), 10)])
        );
        assert_eq!(store.keys(), ["metrics-distinct:2024:01", WATERMARK]);
        assert_eq!(
            store.get(WATERMARK).await.unwrap().as_deref(),
            Some("2024-01-05")
        );
    }

    #[tokio::test]
    async fn test_second_cycle_is_noop() {
        let store = seeded_store().await;
        store.set(WATERMARK, "2023-12-31");
        let consolidator = consolidator(store.clone());

        consolidator.run_cycle().await.unwrap();
        let report = consolidator.run_cycle().await.unwrap();

        assert_eq!(
            report,
            CycleReport::UpToDate {
                watermark: date(2024, 1, 5)
            }
        );
        assert_eq!(
            store.read_all("metrics-distinct:2024:01").await.unwrap()["login"],
            10
        );
    }

    #[tokio::test]
    async fn test_initializes_watermark() {
        let store = seeded_store().await;

        let report = consolidator(store.clone()).run_cycle().await.unwrap();

        assert_eq!(
            report,
            CycleReport::Initialized {
                watermark: date(2024, 2, 4)
            }
        );
        assert_eq!(
            store.get(WATERMARK).await.unwrap().as_deref(),
            Some("2024-02-04")
        );
        // The bootstrap cycle does not consolidate anything.
        assert!(
            store
                .read_all("metrics-distinct:2024:01")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_counts_empty_days() {
        let store = seeded_store().await;
        store.set(WATERMARK, "2023-12-25");

        let report = consolidator(store.clone()).run_cycle().await.unwrap();

        assert_eq!(
            report,
            CycleReport::Advanced {
                from: date(2023, 12, 25),
                to: date(2024, 1, 5),
                merged: 5,
                empty: 6,
            }
        );
    }

    #[tokio::test]
    async fn test_accepts_rfc2822_watermark() {
        let store = seeded_store().await;
        store.set(WATERMARK, "Sun, 31 Dec 2023 10:00:00 +0000");

        consolidator(store.clone()).run_cycle().await.unwrap();

        assert_eq!(
            store.get(WATERMARK).await.unwrap().as_deref(),
            Some("2024-01-05")
        );
    }

    #[tokio::test]
    async fn test_invalid_watermark() {
        let store = seeded_store().await;
        store.set(WATERMARK, "last tuesday");

        let error = consolidator(store.clone()).run_cycle().await.unwrap_err();

        assert!(matches!(error, ConsolidationError::InvalidWatermark(_)));
        assert!(!error.is_conflict());
        assert_eq!(store.keys().len(), 6);
    }

    #[tokio::test]
    async fn test_future_watermark_is_kept() {
        let store = seeded_store().await;
        store.set(WATERMARK, "2024-03-01");

        let report = consolidator(store.clone()).run_cycle().await.unwrap();

        assert_eq!(
            report,
            CycleReport::UpToDate {
                watermark: date(2024, 3, 1)
            }
        );
        assert_eq!(
            store.get(WATERMARK).await.unwrap().as_deref(),
            Some("2024-03-01")
        );
    }

    #[tokio::test]
    async fn test_days_per_cycle_cap() {
        let store = seeded_store().await;
        store.set(WATERMARK, "2023-12-31");
        let config = ConsolidationConfig {
            max_days_per_cycle: 3,
            ..Default::default()
        };
        let consolidator = Consolidator::new(store.clone(), clock(), config);

        let first = consolidator.run_cycle().await.unwrap();
        assert_eq!(
            first,
            CycleReport::Advanced {
                from: date(2023, 12, 31),
                to: date(2024, 1, 3),
                merged: 3,
                empty: 0,
            }
        );

        let second = consolidator.run_cycle().await.unwrap();
        assert_eq!(
            second,
            CycleReport::Advanced {
                from: date(2024, 1, 3),
                to: date(2024, 1, 5),
                merged: 2,
                empty: 0,
            }
        );
        assert_eq!(
            store.read_all("metrics-distinct:2024:01").await.unwrap()["login"],
            10
        );
    }

    #[tokio::test]
    async fn test_conflict_free_cycle_reaches_limit() {
        let store = MemoryBucketStore::new();
        store.set(WATERMARK, "2023-06-01");

        consolidator(store.clone()).run_cycle().await.unwrap();

        // 2024-02-05 minus 30 days of retention minus one day.
        assert_eq!(
            store.get(WATERMARK).await.unwrap().as_deref(),
            Some("2024-01-05")
        );
    }

    /// Advances the watermark behind the consolidator's back when the first day is merged.
    struct Interfering {
        inner: MemoryBucketStore,
    }

    impl BucketStore for Interfering {
        type Guard = MemoryGuard;

        async fn increment(&self, key: &str, metric: &str) -> Result<i64, StoreError> {
            self.inner.increment(key, metric).await
        }

        async fn read_all(&self, key: &str) -> Result<Counters, StoreError> {
            self.inner.read_all(key).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn guard(&self, keys: &[String]) -> Result<MemoryGuard, StoreError> {
            if !keys.iter().any(|key| key == WATERMARK) {
                self.inner.set(WATERMARK, "2024-01-10");
            }
            self.inner.guard(keys).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_watermark_wins() {
        let store = seeded_store().await;
        store.set(WATERMARK, "2023-12-31");

        let interfering = Interfering {
            inner: store.clone(),
        };
        let error = consolidator(interfering).run_cycle().await.unwrap_err();
        assert!(error.is_conflict());

        // The other consolidator's progress is not overwritten.
        assert_eq!(
            store.get(WATERMARK).await.unwrap().as_deref(),
            Some("2024-01-10")
        );

        // Days merged before the conflict are never counted twice.
        let report = consolidator(store.clone()).run_cycle().await.unwrap();
        assert_eq!(
            report,
            CycleReport::UpToDate {
                watermark: date(2024, 1, 10)
            }
        );
        assert_eq!(
            store.read_all("metrics-distinct:2024:01").await.unwrap()["login"],
            10
        );
    }

    #[tokio::test]
    async fn test_run_once_returns_failure() {
        let store = MemoryBucketStore::new();
        store.set(WATERMARK, "garbage");

        let result = consolidator(store).run_once().await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_runs_periodically() {
        let store = MemoryBucketStore::new();
        let clock = clock();
        let controller = Controller::new(Duration::from_secs(1));
        let config = ConsolidationConfig {
            interval: Duration::from_secs(3600),
            ..Default::default()
        };

        let consolidator = Consolidator::new(store.clone(), clock.clone(), config);
        let handle = ConsolidationService::new(consolidator, controller.shutdown_handle()).start();

        // The first cycle runs immediately.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            store.get(WATERMARK).await.unwrap().as_deref(),
            Some("2024-02-04")
        );

        store
            .increment("metrics-distinct:2024:02:05", "login")
            .await
            .unwrap();
        clock.advance(TimeDelta::days(40));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(
            store.get(WATERMARK).await.unwrap().as_deref(),
            Some("2024-02-14")
        );
        assert_eq!(
            store.read_all("metrics-distinct:2024:02").await.unwrap()["login"],
            1
        );

        controller.shutdown(ShutdownMode::Graceful);
        handle.await.unwrap();
    }
}
