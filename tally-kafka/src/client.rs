use rdkafka::ClientConfig;
use rdkafka::ClientContext;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError as ClientError;
use tally_log::LogError;
use tally_statsd::metric;
use thiserror::Error;

use crate::config::KafkaConfig;
use crate::statsd::KafkaCounters;

/// Kafka client errors.
#[derive(Debug, Error)]
pub enum KafkaError {
    /// The client could not be created from the configuration.
    #[error("failed to create kafka client: invalid kafka config")]
    InvalidConfig(#[source] ClientError),

    /// Subscribing to the topic failed.
    #[error("failed to subscribe to kafka topic")]
    Subscribe(#[source] ClientError),

    /// An event could not be serialized.
    #[error("failed to serialize event")]
    Serialize(#[source] serde_json::Error),

    /// The broker did not accept a message.
    #[error("failed to send kafka message")]
    SendFailed(#[source] ClientError),

    /// Committing or seeking an offset failed.
    #[error("failed to settle kafka message")]
    Settle(#[source] ClientError),
}

/// Kafka client context that logs client errors.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingContext;

impl ClientContext for LoggingContext {
    fn error(&self, error: ClientError, reason: &str) {
        metric!(counter(KafkaCounters::ClientError) += 1);
        tally_log::error!("kafka client error: {reason}: {}", LogError(&error));
    }
}

impl ConsumerContext for LoggingContext {}

/// Builds the librdkafka configuration shared by producers and consumers.
///
/// Custom `params` are applied last and can override the defaults.
pub(crate) fn client_config(config: &KafkaConfig, group_id: Option<&str>) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.brokers);

    if let Some(group_id) = group_id {
        client_config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest");
    }

    for (name, value) in &config.params {
        client_config.set(name, value);
    }

    client_config
}
