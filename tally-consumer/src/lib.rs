//! At-least-once consumption of telemetry events.
//!
//! Every worker receives events from the broker as [`Delivery`] envelopes. The envelope is
//! consumed by [`consume`], which validates and decodes it, passes the [`Event`] to an
//! [`EventHandler`] and settles the envelope exactly once:
//!
//! - a wrong content type, a malformed payload or a missing field rejects the envelope without
//!   retry, and the handler is never invoked;
//! - a handler failure rejects the envelope, with retry if the [`ConsumeError`] is transient;
//! - a successful handler acknowledges the envelope.
//!
//! [`ConsumerService`] drives this protocol in a loop over a [`DeliverySource`], one envelope at
//! a time, until shutdown.
//!
//! [`Event`]: tally_event::Event
#![warn(missing_docs)]

mod delivery;
mod protocol;
mod service;
mod statsd;

#[cfg(any(test, feature = "test"))]
mod memory;

pub use self::delivery::*;
pub use self::protocol::*;
pub use self::service::*;

#[cfg(any(test, feature = "test"))]
pub use self::memory::*;
