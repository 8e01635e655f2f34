use tally_statsd::{CounterMetric, TimerMetric};

/// Counter metrics for the consumption protocol.
pub enum ConsumerCounters {
    /// Number of events that were handled and acknowledged.
    EventAccepted,
    /// Number of deliveries that were rejected.
    ///
    /// This metric is tagged with:
    ///  - `reason`: `content_type`, `malformed`, `invalid` or `handler`.
    ///  - `requeue`: Whether the broker was asked to redeliver the message.
    EventRejected,
    /// Number of deliveries that could not be acknowledged or rejected.
    SettleFailed,
}

impl CounterMetric for ConsumerCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::EventAccepted => "consumer.event.accepted",
            Self::EventRejected => "consumer.event.rejected",
            Self::SettleFailed => "consumer.settle.failed",
        }
    }
}

/// Timer metrics for the consumption protocol.
pub enum ConsumerTimers {
    /// Time spent in the event handler, regardless of the outcome.
    HandlerDuration,
}

impl TimerMetric for ConsumerTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::HandlerDuration => "consumer.handler.duration",
        }
    }
}
