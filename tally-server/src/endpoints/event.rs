//! Ingestion of telemetry events.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tally_event::{CONTENT_TYPE, RawEvent, ValidationError};
use tally_log::LogError;
use tally_statsd::metric;

use crate::api::ApiErrorResponse;
use crate::service::ServiceState;
use crate::sink::{EventSink, SinkError};
use crate::statsd::ServerCounters;

/// An ingestion request that was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum BadEventRequest {
    /// The request used another method than `POST`.
    #[error("method not allowed")]
    Method,

    /// The content type header was missing or not JSON.
    #[error("invalid content type {0:?}, expected application/json")]
    ContentType(String),

    /// The body is not a JSON object of the expected shape.
    #[error("could not decode event")]
    Malformed(#[source] serde_json::Error),

    /// A required property is missing.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The event could not be forwarded to the broker.
    #[error("failed to queue event")]
    Sink(#[source] SinkError),
}

impl BadEventRequest {
    fn reason(&self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::ContentType(_) => "content_type",
            Self::Malformed(_) | Self::Invalid(_) => "body",
            Self::Sink(_) => "sink",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Method => StatusCode::METHOD_NOT_ALLOWED,
            Self::ContentType(_) | Self::Malformed(_) | Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::Sink(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BadEventRequest {
    fn into_response(self) -> Response {
        let response = ApiErrorResponse::from_error(&self).into_response_with(self.status());

        if matches!(self, Self::Method) {
            return ([(header::ALLOW, "POST")], response).into_response();
        }

        response
    }
}

/// Returns `true` if the media type of the header value is JSON, ignoring parameters.
fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default();
    essence.trim().eq_ignore_ascii_case(CONTENT_TYPE)
}

async fn accept<S: EventSink>(
    state: &ServiceState<S>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), BadEventRequest> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if !is_json(content_type) {
        return Err(BadEventRequest::ContentType(content_type.to_owned()));
    }

    let mut raw = RawEvent::parse(body).map_err(BadEventRequest::Malformed)?;
    raw.timestamp = Some(state.now());
    let event = raw.validate()?;

    state
        .sink()
        .send(&event)
        .await
        .map_err(BadEventRequest::Sink)?;

    tally_log::debug!(username = %event.username, metric = %event.metric, "accepted event");
    Ok(())
}

fn finish<S: EventSink>(
    state: &ServiceState<S>,
    start: Instant,
    result: Result<(), BadEventRequest>,
) -> Response {
    state.stats().track(start.elapsed(), result.is_ok());

    match result {
        Ok(()) => {
            metric!(counter(ServerCounters::EventAccepted) += 1);
            StatusCode::ACCEPTED.into_response()
        }
        Err(error) => {
            metric!(counter(ServerCounters::EventRejected) += 1, reason = error.reason());
            match &error {
                BadEventRequest::Sink(_) => {
                    tally_log::error!("failed to accept event: {}", LogError(&error));
                }
                _ => tally_log::debug!("rejected event: {}", LogError(&error)),
            }
            error.into_response()
        }
    }
}

/// Handles `POST /event`.
///
/// The server attaches the current time to the event and forwards it to the sink.
pub async fn handle<S: EventSink>(
    State(state): State<ServiceState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let result = accept(&state, &headers, &body).await;
    finish(&state, start, result)
}

/// Handles all other methods on `/event`.
pub async fn method_not_allowed<S: EventSink>(State(state): State<ServiceState<S>>) -> Response {
    finish(&state, Instant::now(), Err(BadEventRequest::Method))
}
