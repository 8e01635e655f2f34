//! A simple liveness check.

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct Status {
    is_healthy: bool,
}

/// Handles `GET /healthz`.
pub async fn handle() -> Json<Status> {
    Json(Status { is_healthy: true })
}
