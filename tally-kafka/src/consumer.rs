use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use tally_consumer::{Delivery, DeliveryError, DeliverySource};
use tally_statsd::metric;

use crate::client::{KafkaError, LoggingContext, client_config};
use crate::config::KafkaConfig;
use crate::producer::CONTENT_TYPE_HEADER;
use crate::statsd::KafkaCounters;

/// Timeout for seeking a partition back to a rejected message.
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

type Client = StreamConsumer<LoggingContext>;

/// Receives events of the configured topic as a member of a consumer group.
///
/// Offsets are never committed automatically. Each [`KafkaDelivery`] commits its own offset when
/// it is acknowledged or dropped, and rewinds its partition when it is requeued.
pub struct KafkaConsumer {
    consumer: Arc<Client>,
    retry_delay: Duration,
}

impl KafkaConsumer {
    /// Joins the consumer group `group_id` and subscribes to the configured topic.
    pub fn subscribe(config: &KafkaConfig, group_id: &str) -> Result<Self, KafkaError> {
        let consumer: Client = client_config(config, Some(group_id))
            .create_with_context(LoggingContext)
            .map_err(KafkaError::InvalidConfig)?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(KafkaError::Subscribe)?;

        Ok(Self {
            consumer: Arc::new(consumer),
            retry_delay: config.retry_delay(),
        })
    }
}

impl DeliverySource for KafkaConsumer {
    type Delivery = KafkaDelivery;

    async fn recv(&mut self) -> Result<Option<KafkaDelivery>, DeliveryError> {
        let message = self.consumer.recv().await.map_err(DeliveryError::new)?;

        Ok(Some(KafkaDelivery {
            consumer: self.consumer.clone(),
            topic: message.topic().to_owned(),
            partition: message.partition(),
            offset: message.offset(),
            content_type: content_type(message.headers()),
            payload: message.payload().unwrap_or_default().to_vec(),
            retry_delay: self.retry_delay,
        }))
    }
}

impl fmt::Debug for KafkaConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaConsumer")
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

/// A message received by a [`KafkaConsumer`].
pub struct KafkaDelivery {
    consumer: Arc<Client>,
    topic: String,
    partition: i32,
    offset: i64,
    content_type: Option<String>,
    payload: Vec<u8>,
    retry_delay: Duration,
}

impl KafkaDelivery {
    fn commit(&self) -> Result<(), KafkaError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(KafkaError::Settle)?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(KafkaError::Settle)
    }

    fn rewind(&self) -> Result<(), KafkaError> {
        self.consumer
            .seek(
                &self.topic,
                self.partition,
                Offset::Offset(self.offset),
                SEEK_TIMEOUT,
            )
            .map_err(KafkaError::Settle)
    }
}

impl Delivery for KafkaDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    async fn ack(self) -> Result<(), DeliveryError> {
        self.commit().map_err(DeliveryError::new)
    }

    async fn reject(self, requeue: bool) -> Result<(), DeliveryError> {
        if !requeue {
            return self.commit().map_err(DeliveryError::new);
        }

        // Messages of a partition are delivered in order, so the next receive on this
        // partition yields the rejected message again.
        tokio::time::sleep(self.retry_delay).await;
        metric!(counter(KafkaCounters::Redelivery) += 1);
        self.rewind().map_err(DeliveryError::new)
    }
}

impl fmt::Debug for KafkaDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaDelivery")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Extracts the content type header. Header names are case insensitive.
fn content_type<H: Headers>(headers: Option<&H>) -> Option<String> {
    let header = headers?
        .iter()
        .find(|header| header.key.eq_ignore_ascii_case(CONTENT_TYPE_HEADER))?;

    let value = std::str::from_utf8(header.value?).ok()?;
    Some(value.to_owned())
}
