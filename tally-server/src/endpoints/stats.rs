//! Response time statistics of the ingestion endpoint.

use axum::Json;
use axum::extract::State;

use crate::service::ServiceState;
use crate::sink::EventSink;
use crate::stats::StatsReport;

/// Handles `GET /stats`.
pub async fn handle<S: EventSink>(State(state): State<ServiceState<S>>) -> Json<StatsReport> {
    Json(state.stats().report())
}
