//! Aggregates over the raw events of the last hour.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tally_log::LogError;

use crate::api::ApiErrorResponse;
use crate::service::{HourlyLogs, ServiceState};
use crate::sink::EventSink;
use crate::store::{MetricSummary, SqliteStoreError, UserMetricSummary};

#[derive(Debug, thiserror::Error)]
pub enum HourlyError {
    #[error("the raw log is not available on this server")]
    NotConfigured,
    #[error("failed to query the raw log")]
    Query(#[from] SqliteStoreError),
}

impl IntoResponse for HourlyError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotConfigured => StatusCode::NOT_FOUND,
            Self::Query(_) => {
                tally_log::error!("{}", LogError(&self));
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        ApiErrorResponse::from_error(&self).into_response_with(status)
    }
}

fn hourly<S: EventSink>(state: &ServiceState<S>) -> Result<&HourlyLogs, HourlyError> {
    state.hourly().ok_or(HourlyError::NotConfigured)
}

/// Handles `GET /hourly/totals`.
pub async fn totals<S: EventSink>(
    State(state): State<ServiceState<S>>,
) -> Result<Json<Vec<MetricSummary>>, HourlyError> {
    let hourly = hourly(&state)?;
    let since = hourly.since(state.now());
    Ok(Json(hourly.store().totals(since).await?))
}

/// Handles `GET /hourly/users`.
pub async fn users<S: EventSink>(
    State(state): State<ServiceState<S>>,
) -> Result<Json<Vec<UserMetricSummary>>, HourlyError> {
    let hourly = hourly(&state)?;
    let since = hourly.since(state.now());
    Ok(Json(hourly.store().per_user(since).await?))
}
