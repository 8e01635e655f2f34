//! Middlewares for the HTTP server.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use tally_statsd::metric;

use crate::statsd::ServerTimers;

/// Reports the duration of every request to statsd.
pub async fn metrics(matched_path: Option<MatchedPath>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();

    let response = next.run(request).await;

    let route = matched_path.as_ref().map_or("unknown", |p| p.as_str());
    metric!(
        timer(ServerTimers::RequestDuration) = start.elapsed(),
        route = route,
        method = method.as_str(),
        status_code = response.status().as_str(),
    );

    response
}
