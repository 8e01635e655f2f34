//! Endpoints, stores and background services of Tally.
//!
//! The collector serves the HTTP [`routes`] and forwards accepted events to an [`EventSink`],
//! in production the Kafka producer. The first-seen and raw-log workers pair a
//! [`ConsumerService`](tally_consumer::ConsumerService) with the handlers in this crate:
//!
//! - [`FirstSeenHandler`] records the first event of every user in a [`FirstSeenStore`].
//! - [`RawLogHandler`] appends every event to a [`RawLogStore`], which the [`PurgeService`]
//!   periodically cleans up.
//!
//! Both stores are SQLite databases, created and migrated on first use.
#![warn(missing_docs)]

mod api;
mod endpoints;
mod middlewares;
mod purge;
mod server;
mod service;
mod sink;
mod stats;
mod statsd;
mod store;
mod workers;

pub use self::api::ApiErrorResponse;
pub use self::endpoints::{BadEventRequest, routes};
pub use self::purge::PurgeService;
pub use self::server::{HttpServer, ServerError};
pub use self::service::{HourlyLogs, ServiceState};
pub use self::sink::{EventSink, MemorySink, SinkError};
pub use self::stats::{RequestCounts, ResponseTimes, ServerStats, StatsReport};
pub use self::store::*;
pub use self::workers::*;
