use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tally_consumer::BoxError;
use tally_event::Event;
use tally_kafka::KafkaProducer;
use thiserror::Error;

/// An event could not be forwarded.
#[derive(Debug, Error)]
#[error("failed to forward event")]
pub struct SinkError(#[source] pub BoxError);

impl SinkError {
    /// Wraps a backend error.
    pub fn new(error: impl Into<BoxError>) -> Self {
        Self(error.into())
    }
}

/// Destination of events accepted by the ingestion endpoint.
pub trait EventSink: Send + Sync + 'static {
    /// Forwards an event. Resolves once the event is stored durably.
    fn send(&self, event: &Event) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl EventSink for KafkaProducer {
    async fn send(&self, event: &Event) -> Result<(), SinkError> {
        self.send_event(event).await.map_err(SinkError::new)
    }
}

/// An [`EventSink`] that keeps events in memory.
///
/// Clones share the same events. Used for tests and local runs without a broker.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
    failing: Arc<AtomicBool>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events sent so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Makes subsequent sends fail, or succeed again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

impl EventSink for MemorySink {
    async fn send(&self, event: &Event) -> Result<(), SinkError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(SinkError::new("sink unavailable"));
        }

        self.events.lock().push(event.clone());
        Ok(())
    }
}
