use tally_statsd::CounterMetric;

pub(crate) enum KafkaCounters {
    /// Number of events acknowledged by the broker.
    Produced,
    /// Number of events the broker did not accept.
    ProduceFailed,
    /// Number of partitions rewound to redeliver a rejected message.
    Redelivery,
    /// Number of errors reported by librdkafka outside of a specific request, such as lost
    /// broker connections.
    ClientError,
}

impl CounterMetric for KafkaCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Produced => "kafka.produce.success",
            Self::ProduceFailed => "kafka.produce.failed",
            Self::Redelivery => "kafka.consume.redelivery",
            Self::ClientError => "kafka.client.error",
        }
    }
}
