use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tally_system::Clock;

use crate::sink::EventSink;
use crate::stats::ServerStats;
use crate::store::RawLogStore;

/// Queries of the raw log served by the `/hourly` endpoints.
#[derive(Clone, Debug)]
pub struct HourlyLogs {
    store: RawLogStore,
    window: Duration,
}

impl HourlyLogs {
    /// Serves aggregates over the events of the last `window`.
    pub fn new(store: RawLogStore, window: Duration) -> Self {
        Self { store, window }
    }

    /// Returns the raw log store.
    pub fn store(&self) -> &RawLogStore {
        &self.store
    }

    /// Returns the oldest timestamp included in the aggregates at `now`.
    pub fn since(&self, now: i64) -> i64 {
        let window = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(window)
    }
}

/// Server state shared by all endpoints.
pub struct ServiceState<S> {
    sink: Arc<S>,
    stats: Arc<ServerStats>,
    clock: Arc<dyn Clock>,
    hourly: Option<HourlyLogs>,
}

impl<S: EventSink> ServiceState<S> {
    /// Creates the state of a collector forwarding events to `sink`.
    ///
    /// The average response time in `/stats` covers the last `response_buffer_size` requests.
    pub fn new(sink: S, clock: impl Clock, response_buffer_size: usize) -> Self {
        Self {
            sink: Arc::new(sink),
            stats: Arc::new(ServerStats::new(response_buffer_size)),
            clock: Arc::new(clock),
            hourly: None,
        }
    }

    /// Enables the `/hourly` endpoints.
    pub fn with_hourly_logs(mut self, hourly: HourlyLogs) -> Self {
        self.hourly = Some(hourly);
        self
    }

    /// Returns the destination of accepted events.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Returns the statistics of the ingestion endpoint.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Returns the current time as unix timestamp.
    pub fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    /// Returns the raw log queries, if enabled.
    pub fn hourly(&self) -> Option<&HourlyLogs> {
        self.hourly.as_ref()
    }
}

impl<S> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            stats: self.stats.clone(),
            clock: self.clock.clone(),
            hourly: self.hourly.clone(),
        }
    }
}

impl<S> fmt::Debug for ServiceState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceState")
            .field("stats", &self.stats)
            .field("hourly", &self.hourly)
            .finish_non_exhaustive()
    }
}
