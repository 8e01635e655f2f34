//! Kafka transport for events.
//!
//! By default, this library only provides the [`KafkaConfig`]. With the `impl` feature enabled,
//! the [`KafkaProducer`] publishes events and the [`KafkaConsumer`] receives them as a
//! [`DeliverySource`](tally_consumer::DeliverySource) for the consumption protocol.
//!
//! Every worker kind joins its own consumer group, so each of them sees every event. Within a
//! group, the consumer commits offsets manually once a delivery is settled:
//!
//! | settlement       | effect                                                  |
//! |------------------|---------------------------------------------------------|
//! | `ack`            | commit the message offset                               |
//! | `reject(false)`  | commit the message offset, the message is dropped       |
//! | `reject(true)`   | wait `retry_delay`, then seek back to the message       |
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod config;
pub use self::config::*;

#[cfg(feature = "impl")]
mod client;
#[cfg(feature = "impl")]
mod consumer;
#[cfg(feature = "impl")]
mod producer;
#[cfg(feature = "impl")]
mod statsd;

#[cfg(feature = "impl")]
pub use self::client::{KafkaError, LoggingContext};
#[cfg(feature = "impl")]
pub use self::consumer::*;
#[cfg(feature = "impl")]
pub use self::producer::*;
