//! Foundational system components for Tally's services.
//!
//! Every long-running part of Tally is a [`Service`]: a consumer loop, the consolidation
//! scheduler, the TTL purge or the HTTP server. Services are started on the current tokio runtime
//! and observe a [`ShutdownHandle`] obtained from the [`Controller`]. The controller listens for
//! process signals and broadcasts a [`Shutdown`] to all handles.
#![warn(missing_docs)]

mod clock;
mod controller;
mod runtime;
mod service;
mod statsd;

pub use self::clock::*;
pub use self::controller::*;
pub use self::runtime::*;
pub use self::service::*;
