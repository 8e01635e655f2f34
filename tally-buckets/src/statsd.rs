use tally_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics for time buckets.
pub enum BucketCounters {
    /// Number of events counted into a daily bucket.
    EventCounted,
    /// Number of days processed by consolidation.
    ///
    /// This metric is tagged with:
    ///  - `outcome`: `merged` if counters were moved into the monthly bucket, `empty` otherwise.
    DaysConsolidated,
    /// Number of consolidation cycles abandoned because the watermark was modified concurrently.
    ConsolidationConflict,
    /// Number of consolidation cycles that failed with an error other than a conflict.
    ConsolidationFailed,
}

impl CounterMetric for BucketCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::EventCounted => "buckets.event.counted",
            Self::DaysConsolidated => "buckets.consolidation.days",
            Self::ConsolidationConflict => "buckets.consolidation.conflict",
            Self::ConsolidationFailed => "buckets.consolidation.failed",
        }
    }
}

/// Timer metrics for time buckets.
pub enum BucketTimers {
    /// Duration of a single consolidation cycle, including failed ones.
    ConsolidationCycle,
}

impl TimerMetric for BucketTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::ConsolidationCycle => "buckets.consolidation.duration",
        }
    }
}

/// Gauge metrics for time buckets.
pub enum BucketGauges {
    /// Days between the watermark and today after a consolidation cycle.
    WatermarkLag,
}

impl GaugeMetric for BucketGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::WatermarkLag => "buckets.consolidation.watermark_lag",
        }
    }
}
