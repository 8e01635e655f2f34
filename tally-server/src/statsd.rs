use tally_statsd::{CounterMetric, TimerMetric};

/// Counter metrics of the server and its workers.
pub enum ServerCounters {
    /// Number of events accepted by the ingestion endpoint and forwarded to the broker.
    EventAccepted,
    /// Number of ingestion requests that were not accepted.
    ///
    /// This metric is tagged with:
    ///  - `reason`: `method`, `content_type`, `body` or `sink`.
    EventRejected,
    /// Number of users seen for the first time.
    NewUser,
    /// Number of events appended to the raw log.
    RawEventRecorded,
    /// Number of raw events removed by the purge.
    RawEventsPurged,
    /// Number of purges that failed.
    PurgeFailed,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::EventAccepted => "server.event.accepted",
            Self::EventRejected => "server.event.rejected",
            Self::NewUser => "first_seen.new_user",
            Self::RawEventRecorded => "raw_log.recorded",
            Self::RawEventsPurged => "raw_log.purged",
            Self::PurgeFailed => "raw_log.purge.failed",
        }
    }
}

/// Timer metrics of the server and its workers.
pub enum ServerTimers {
    /// Total time spent handling an HTTP request.
    ///
    /// This metric is tagged with:
    ///  - `route`: The matched route, or `unknown`.
    ///  - `method`: The HTTP method.
    ///  - `status_code`: The HTTP status code of the response.
    RequestDuration,
    /// Duration of a single purge of the raw log.
    PurgeDuration,
}

impl TimerMetric for ServerTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::RequestDuration => "requests.duration",
            Self::PurgeDuration => "raw_log.purge.duration",
        }
    }
}
