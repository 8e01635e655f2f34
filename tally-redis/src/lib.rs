//! Abstraction over the Redis instance that holds the time buckets.
//!
//! By default, this library only provides the configuration types. With the `impl` feature, the
//! pooled client is implemented.
#![warn(missing_docs)]

mod config;
pub use self::config::*;

#[cfg(feature = "impl")]
mod real;
#[cfg(feature = "impl")]
pub use self::real::*;
