use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::{TimeZone, Utc};
use tally_buckets::{BucketStore, DistinctHandler, MemoryBucketStore};
use tally_consumer::{ConsumerService, MemoryQueue, Settlement};
use tally_event::Event;
use tally_server::{EventSink, FirstSeenHandler, FirstSeenStore, ServiceState, SinkError, routes};
use tally_system::{Controller, FixedClock, Service};
use tower::ServiceExt;

/// Publishes accepted events to an in-memory queue.
#[derive(Clone, Default)]
struct QueueSink(MemoryQueue);

impl EventSink for QueueSink {
    async fn send(&self, event: &Event) -> Result<(), SinkError> {
        self.0.publish_event(event);
        Ok(())
    }
}

async fn ingest(app: &axum::Router, username: &str, metric: &str) {
    let body = format!(r#"{{"username": "{username}", "metric": "{metric}", "count": 1}}"#);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/event")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_ingested_events_are_counted_per_day() {
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap());
    let sink = QueueSink::default();
    let queue = sink.0.clone();
    let app = routes(ServiceState::new(sink, clock, 8));

    ingest(&app, "alice", "login").await;
    ingest(&app, "bob", "login").await;
    ingest(&app, "alice", "login").await;
    assert_eq!(queue.pending(), 3);

    let store = MemoryBucketStore::new();
    let controller = Controller::new(std::time::Duration::from_secs(1));
    let consumer = ConsumerService::new(
        "distinct",
        queue.clone(),
        DistinctHandler::new(store.clone(), "metrics-distinct"),
        controller.shutdown_handle(),
    );

    // The queue is exhausted after the three events, which ends the consumer.
    consumer.start().await.unwrap();

    let counters = store.read_all("metrics-distinct:2024:03:05").await.unwrap();
    assert_eq!(counters["login"], 3);
    assert!(
        queue
            .settlements()
            .iter()
            .all(|(_, settlement)| *settlement == Settlement::Acked)
    );
}

#[tokio::test]
async fn test_first_seen_worker_keeps_first_event() {
    let dir = tempfile::tempdir().unwrap();
    let store = FirstSeenStore::open(&dir.path().join("first_seen.db"))
        .await
        .unwrap();

    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap());
    let sink = QueueSink::default();
    let queue = sink.0.clone();
    let app = routes(ServiceState::new(sink, clock, 8));

    ingest(&app, "alice", "signup").await;
    ingest(&app, "alice", "login").await;

    let controller = Controller::new(std::time::Duration::from_secs(1));
    ConsumerService::new(
        "first-seen",
        queue,
        FirstSeenHandler::new(store.clone()),
        controller.shutdown_handle(),
    )
    .start()
    .await
    .unwrap();

    let first = store.get("alice").await.unwrap().unwrap();
    assert_eq!(first.metric, "signup");
}
