use std::fmt;
use std::future::Future;
use std::time::Instant;

use tally_event::{CONTENT_TYPE, Event, EventField, RawEvent};
use tally_log::LogError;
use tally_statsd::metric;
use thiserror::Error;

use crate::statsd::{ConsumerCounters, ConsumerTimers};
use crate::{BoxError, Delivery, DeliveryError};

/// A handler failed to process an event.
///
/// The handler decides whether the failure is worth a retry. Transient failures, such as an
/// unreachable store, are requeued. Permanent failures, such as an event that can never be
/// stored, are dropped.
#[derive(Debug, Error)]
#[error("failed to handle event")]
pub struct ConsumeError {
    requeue: bool,
    #[source]
    source: BoxError,
}

impl ConsumeError {
    /// Creates a failure that should be retried by redelivering the event.
    pub fn transient(error: impl Into<BoxError>) -> Self {
        Self {
            requeue: true,
            source: error.into(),
        }
    }

    /// Creates a failure that will not go away by retrying.
    pub fn permanent(error: impl Into<BoxError>) -> Self {
        Self {
            requeue: false,
            source: error.into(),
        }
    }

    /// Returns `true` if the event should be redelivered.
    pub fn requeue(&self) -> bool {
        self.requeue
    }
}

/// Processes decoded events on behalf of a worker.
pub trait EventHandler: Send + Sync {
    /// Handles a single event.
    ///
    /// The delivery is acknowledged only after this resolves successfully.
    fn handle(&self, event: &Event) -> impl Future<Output = Result<(), ConsumeError>> + Send;
}

/// Why a delivery was rejected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RejectReason {
    /// The content type was missing or not `application/json`.
    ContentType(Option<String>),
    /// The payload could not be decoded.
    Malformed,
    /// A required field was missing.
    Invalid(EventField),
    /// The handler failed.
    Handler,
}

impl RejectReason {
    /// Returns the reason as used in metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentType(_) => "content_type",
            Self::Malformed => "malformed",
            Self::Invalid(_) => "invalid",
            Self::Handler => "handler",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentType(Some(content_type)) => {
                write!(f, "unsupported content type {content_type:?}")
            }
            Self::ContentType(None) => f.write_str("missing content type"),
            Self::Malformed => f.write_str("malformed payload"),
            Self::Invalid(field) => write!(f, "required {field} property is not present"),
            Self::Handler => f.write_str("handler failed"),
        }
    }
}

/// The settlement decision taken for a delivery.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The event was handled and the delivery acknowledged.
    Acked,
    /// The delivery was rejected.
    Rejected {
        /// Whether the broker was asked to redeliver.
        requeue: bool,
        /// Why the delivery was rejected.
        reason: RejectReason,
    },
}

/// Validates, decodes and handles a delivery, then settles it exactly once.
///
/// Input failures reject without requeue and never reach the handler. Handler failures reject
/// with the requeue flag chosen by the handler. Only a failure to settle the delivery is
/// returned as an error.
pub async fn consume<D, H>(delivery: D, handler: &H) -> Result<Outcome, DeliveryError>
where
    D: Delivery,
    H: EventHandler,
{
    let event = match check(&delivery) {
        Ok(event) => event,
        Err(reason) => {
            tally_log::warn!(reason = reason.as_str(), "rejecting delivery: {reason}");
            return settle_rejected(delivery, false, reason).await;
        }
    };

    let start = Instant::now();
    let result = handler.handle(&event).await;
    metric!(timer(ConsumerTimers::HandlerDuration) = start.elapsed());

    match result {
        Ok(()) => {
            delivery.ack().await.inspect_err(settle_failed)?;
            metric!(counter(ConsumerCounters::EventAccepted) += 1);
            Ok(Outcome::Acked)
        }
        Err(error) => {
            let requeue = error.requeue();
            tally_log::warn!(
                requeue,
                metric = %event.metric,
                "rejecting delivery: {}",
                LogError(&error)
            );
            settle_rejected(delivery, requeue, RejectReason::Handler).await
        }
    }
}

fn check(delivery: &impl Delivery) -> Result<Event, RejectReason> {
    match delivery.content_type() {
        Some(CONTENT_TYPE) => (),
        other => return Err(RejectReason::ContentType(other.map(str::to_owned))),
    }

    let raw = RawEvent::parse(delivery.payload()).map_err(|_| RejectReason::Malformed)?;
    raw.validate().map_err(|error| RejectReason::Invalid(error.0))
}

async fn settle_rejected<D: Delivery>(
    delivery: D,
    requeue: bool,
    reason: RejectReason,
) -> Result<Outcome, DeliveryError> {
    delivery.reject(requeue).await.inspect_err(settle_failed)?;
    metric!(
        counter(ConsumerCounters::EventRejected) += 1,
        reason = reason.as_str(),
        requeue = if requeue { "true" } else { "false" },
    );
    Ok(Outcome::Rejected { requeue, reason })
}

fn settle_failed(_: &DeliveryError) {
    metric!(counter(ConsumerCounters::SettleFailed) += 1);
}
