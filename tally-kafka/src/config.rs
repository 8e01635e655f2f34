//! Configuration of the connection to the Kafka cluster.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kafka configuration errors.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// No bootstrap servers were configured.
    #[error("kafka brokers must not be empty")]
    MissingBrokers,
    /// No topic was configured.
    #[error("kafka topic must not be empty")]
    MissingTopic,
}

/// Connection and topic settings shared by the producer and all consumers.
///
/// ```yaml
/// kafka:
///   brokers: localhost:9092
///   topic: metric-events
///   retry_delay: 1
///   params:
///     message.timeout.ms: "5000"
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma separated list of bootstrap servers.
    pub brokers: String,
    /// The topic all events are produced to and consumed from.
    pub topic: String,
    /// Seconds to wait before a rejected event is redelivered.
    pub retry_delay: u64,
    /// Additional librdkafka client properties.
    pub params: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_owned(),
            topic: "metric-events".to_owned(),
            retry_delay: 1,
            params: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    /// Returns the delay before a requeued event is redelivered.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    /// Checks that the configuration can be used to connect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.trim().is_empty() {
            return Err(ConfigError::MissingBrokers);
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        Ok(())
    }
}
