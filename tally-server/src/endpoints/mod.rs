//! Web server endpoints.
//!
//! | Route            | Method | Description                                     |
//! |------------------|--------|-------------------------------------------------|
//! | `/event`         | `POST` | Accepts an event and forwards it to the broker. |
//! | `/stats`         | `GET`  | Request counters and response times.            |
//! | `/hourly/totals` | `GET`  | Raw log aggregates per metric.                  |
//! | `/hourly/users`  | `GET`  | Raw log aggregates per user and metric.         |
//! | `/healthz`       | `GET`  | Liveness check.                                 |

use axum::Router;
use axum::routing::{get, post};

use crate::middlewares;
use crate::service::ServiceState;
use crate::sink::EventSink;

mod event;
mod health_check;
mod hourly;
mod stats;

pub use self::event::BadEventRequest;

/// Builds the router with all routes and middleware.
pub fn routes<S: EventSink>(state: ServiceState<S>) -> Router {
    Router::new()
        .route(
            "/event",
            post(event::handle::<S>).fallback(event::method_not_allowed::<S>),
        )
        .route("/stats", get(stats::handle::<S>))
        .route("/hourly/totals", get(hourly::totals::<S>))
        .route("/hourly/users", get(hourly::users::<S>))
        .route("/healthz", get(health_check::handle))
        .layer(axum::middleware::from_fn(middlewares::metrics))
        .with_state(state)
}
