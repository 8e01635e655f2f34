use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Request counters of a [`StatsReport`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestCounts {
    /// All tracked requests.
    pub total: u64,
    /// Requests that were not accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    /// Requests that were accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<u64>,
}

/// Response times of successful requests in seconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponseTimes {
    /// The fastest response ever tracked.
    pub minimum: f64,
    /// The slowest response ever tracked.
    pub maximum: f64,
    /// Mean of the most recent responses.
    pub average: f64,
}

/// Snapshot of the [`ServerStats`], served as JSON.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsReport {
    /// Request counters.
    pub requests: RequestCounts,
    /// Response times, absent until a request succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_times: Option<ResponseTimes>,
}

#[derive(Debug, Default)]
struct Inner {
    requests: u64,
    failed: u64,
    minimum: Option<Duration>,
    maximum: Option<Duration>,
    recent: VecDeque<Duration>,
}

/// Streaming statistics of the ingestion endpoint.
///
/// Failed requests are counted but their response times are not tracked. The average covers the
/// last `capacity` successful requests only.
#[derive(Debug)]
pub struct ServerStats {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ServerStats {
    /// Creates empty statistics averaging over the last `capacity` response times.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                recent: VecDeque::with_capacity(capacity),
                ..Inner::default()
            }),
        }
    }

    /// Tracks a finished request.
    pub fn track(&self, response_time: Duration, success: bool) {
        let mut inner = self.inner.lock();
        inner.requests += 1;

        if !success {
            inner.failed += 1;
            return;
        }

        inner.minimum = Some(inner.minimum.map_or(response_time, |m| m.min(response_time)));
        inner.maximum = Some(inner.maximum.map_or(response_time, |m| m.max(response_time)));

        if inner.recent.len() == self.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back(response_time);
    }

    /// Returns a snapshot of the current statistics.
    pub fn report(&self) -> StatsReport {
        let inner = self.inner.lock();

        if inner.requests == 0 {
            return StatsReport {
                requests: RequestCounts {
                    total: 0,
                    failed: None,
                    successful: None,
                },
                response_times: None,
            };
        }

        let response_times = match (inner.minimum, inner.maximum) {
            (Some(minimum), Some(maximum)) => {
                let sum: Duration = inner.recent.iter().sum();
                let average = sum.as_secs_f64() / inner.recent.len() as f64;
                Some(ResponseTimes {
                    minimum: minimum.as_secs_f64(),
                    maximum: maximum.as_secs_f64(),
                    average,
                })
            }
            _ => None,
        };

        StatsReport {
            requests: RequestCounts {
                total: inner.requests,
                failed: Some(inner.failed),
                successful: Some(inner.requests - inner.failed),
            },
            response_times,
        }
    }
}
