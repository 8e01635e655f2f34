use std::error::Error;
use std::future::Future;

use thiserror::Error;

/// Boxed error type used for errors from broker and store backends.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Failure to settle a delivery or to receive the next one.
///
/// This usually means that the connection to the broker is gone.
#[derive(Debug, Error)]
#[error("broker operation failed")]
pub struct DeliveryError(#[source] pub BoxError);

impl DeliveryError {
    /// Wraps a backend error.
    pub fn new(error: impl Into<BoxError>) -> Self {
        Self(error.into())
    }
}

/// A message received from the broker together with its settlement controls.
///
/// Settling consumes the delivery, so it can be acknowledged or rejected at most once. A delivery
/// that is dropped without settling is left to the broker, which redelivers it eventually.
pub trait Delivery: Send {
    /// The raw message body.
    fn payload(&self) -> &[u8];

    /// The content type announced by the producer, if any.
    fn content_type(&self) -> Option<&str>;

    /// Acknowledges the delivery. The broker will not redeliver it.
    fn ack(self) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Rejects the delivery.
    ///
    /// With `requeue`, the broker redelivers the message later. Without, the message is dropped.
    fn reject(self, requeue: bool) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// A stream of deliveries, such as a subscribed broker consumer.
pub trait DeliverySource: Send {
    /// The type of deliveries produced by this source.
    type Delivery: Delivery;

    /// Waits for the next delivery.
    ///
    /// Returns `Ok(None)` once the source is exhausted and will not produce any more deliveries.
    fn recv(
        &mut self,
    ) -> impl Future<Output = Result<Option<Self::Delivery>, DeliveryError>> + Send;
}
