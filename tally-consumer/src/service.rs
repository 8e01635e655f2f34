use std::time::Duration;

use tally_log::LogError;
use tally_system::{Service, ShutdownHandle};

use crate::{DeliverySource, EventHandler, consume};

/// Drives the consumption protocol over a [`DeliverySource`].
///
/// Deliveries are processed strictly one after another: the next delivery is only received
/// after the previous one was acknowledged or rejected. On shutdown, the delivery in flight is
/// finished and no further delivery is received.
pub struct ConsumerService<S, H> {
    worker: &'static str,
    source: S,
    handler: H,
    shutdown: ShutdownHandle,
    retry_backoff: Duration,
}

impl<S, H> ConsumerService<S, H>
where
    S: DeliverySource + 'static,
    H: EventHandler + 'static,
{
    /// Creates a consumer for the named worker.
    pub fn new(worker: &'static str, source: S, handler: H, shutdown: ShutdownHandle) -> Self {
        Self {
            worker,
            source,
            handler,
            shutdown,
            retry_backoff: Duration::from_secs(1),
        }
    }

    /// Sets the pause after a failure to receive from the source.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

impl<S, H> Service for ConsumerService<S, H>
where
    S: DeliverySource + 'static,
    H: EventHandler + 'static,
{
    async fn run(mut self) {
        tally_log::info!(worker = self.worker, "consumer started");

        loop {
            let next = tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,
                next = self.source.recv() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    if let Err(error) = consume(delivery, &self.handler).await {
                        tally_log::error!(
                            worker = self.worker,
                            "failed to settle delivery: {}",
                            LogError(&error)
                        );
                    }
                }
                Ok(None) => {
                    tally_log::info!(worker = self.worker, "delivery source exhausted");
                    break;
                }
                Err(error) => {
                    tally_log::error!(
                        worker = self.worker,
                        "failed to receive delivery: {}",
                        LogError(&error)
                    );

                    tokio::select! {
                        _ = self.shutdown.notified() => break,
                        _ = tokio::time::sleep(self.retry_backoff) => (),
                    }
                }
            }
        }

        tally_log::info!(worker = self.worker, "consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tally_event::Event;
    use tally_system::{Controller, ShutdownMode};

    use super::*;
    use crate::{ConsumeError, DeliveryError, MemoryDelivery, MemoryQueue, Settlement};

    #[derive(Clone, Default)]
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &Event) -> Result<(), ConsumeError> {
            self.seen.lock().push(event.username.clone());
            Ok(())
        }
    }

    fn event(username: &str) -> Event {
        Event {
            username: username.to_owned(),
            metric: "login".to_owned(),
            count: 1,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_processes_in_delivery_order() {
        tally_log::init_test!();

        let controller = Controller::new(Duration::from_secs(1));
        let queue = MemoryQueue::new();
        for name in ["a", "b", "c"] {
            queue.publish_event(&event(name));
        }
        queue.publish(Some("text/plain"), "ignored");

        let handler = RecordingHandler::default();
        let service = ConsumerService::new(
            "test",
            queue.clone(),
            handler.clone(),
            controller.shutdown_handle(),
        );
        service.start().await.unwrap();

        assert_eq!(*handler.seen.lock(), ["a", "b", "c"]);
        assert_eq!(
            queue.settlements(),
            [
                (0, Settlement::Acked),
                (1, Settlement::Acked),
                (2, Settlement::Acked),
                (3, Settlement::Dropped),
            ]
        );
    }

    /// A source that never yields.
    struct Silent;

    impl DeliverySource for Silent {
        type Delivery = MemoryDelivery;

        async fn recv(&mut self) -> Result<Option<MemoryDelivery>, DeliveryError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let controller = Controller::new(Duration::from_secs(1));
        let service = ConsumerService::new(
            "test",
            Silent,
            RecordingHandler::default(),
            controller.shutdown_handle(),
        );
        let handle = service.start();

        controller.shutdown(ShutdownMode::Graceful);
        handle.await.unwrap();
    }

    /// A source whose first receive fails.
    struct Flaky {
        attempts: Arc<AtomicUsize>,
        queue: MemoryQueue,
    }

    impl DeliverySource for Flaky {
        type Delivery = MemoryDelivery;

        async fn recv(&mut self) -> Result<Option<MemoryDelivery>, DeliveryError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(DeliveryError::new("connection reset"));
            }
            Ok(self.queue.pop())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backs_off_after_receive_failure() {
        let controller = Controller::new(Duration::from_secs(1));
        let queue = MemoryQueue::new();
        queue.publish_event(&event("a"));

        let attempts = Arc::new(AtomicUsize::new(0));
        let source = Flaky {
            attempts: attempts.clone(),
            queue: queue.clone(),
        };
        let handler = RecordingHandler::default();
        let service = ConsumerService::new(
            "test",
            source,
            handler.clone(),
            controller.shutdown_handle(),
        )
        .retry_backoff(Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        service.start().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*handler.seen.lock(), ["a"]);
    }
}
