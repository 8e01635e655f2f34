use std::fmt;
use std::time::Duration;

use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use tally_event::{CONTENT_TYPE, Event};
use tally_statsd::metric;

use crate::client::{KafkaError, LoggingContext, client_config};
use crate::config::KafkaConfig;
use crate::statsd::KafkaCounters;

/// Name of the message header carrying the payload's content type.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// How long a message may wait in the local queue when it is full.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes events to the configured topic.
///
/// Records are keyed by username, so all events of one user land in the same partition.
pub struct KafkaProducer {
    producer: FutureProducer<LoggingContext>,
    topic: String,
}

impl KafkaProducer {
    /// Creates a producer for the configured cluster and topic.
    pub fn create(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let producer = client_config(config, None)
            .create_with_context(LoggingContext)
            .map_err(KafkaError::InvalidConfig)?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }

    /// Sends an event in its JSON wire format and waits for the broker to acknowledge it.
    pub async fn send_event(&self, event: &Event) -> Result<(), KafkaError> {
        let payload = event.to_json().map_err(KafkaError::Serialize)?;
        let headers = OwnedHeaders::new().insert(Header {
            key: CONTENT_TYPE_HEADER,
            value: Some(CONTENT_TYPE),
        });

        let record = FutureRecord::to(&self.topic)
            .key(&event.username)
            .payload(&payload)
            .headers(headers);

        let result = self.producer.send(record, QUEUE_TIMEOUT).await;
        if let Err((error, _)) = result {
            metric!(counter(KafkaCounters::ProduceFailed) += 1);
            return Err(KafkaError::SendFailed(error));
        }

        metric!(counter(KafkaCounters::Produced) += 1);
        Ok(())
    }
}

impl fmt::Debug for KafkaProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaProducer")
            .field("topic", &self.topic)
            .field("producer", &"<FutureProducer>")
            .finish()
    }
}
