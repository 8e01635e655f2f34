//! Logging facade for Tally.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The configuration
//! implements `serde` traits, so it can be obtained from configuration files.
//!
//! ```ignore
//! use tally_log::LogConfig;
//!
//! let log_config = LogConfig {
//!     level: tally_log::Level::Debug,
//!     ..LogConfig::default()
//! };
//!
//! tally_log::init(&log_config);
//! ```
//!
//! # Logging
//!
//! The basic use of this crate is through the five logging macros: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`] where `error!` represents the highest-priority log messages
//! and `trace!` the lowest. Each of these macros accept format strings similarly to [`println!`]
//! as well as structured fields.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior.
//! - [`warn!`] for undesirable behavior, such as rejected input.
//! - [`info!`] for messages relevant to the average user.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! Errors are attached as a field so that the subscriber can render their source chain:
//!
//! ```
//! let error = std::io::Error::other("oh no!");
//! tally_log::error!(error = &error as &dyn std::error::Error, "operation failed");
//! ```
//!
//! ## Logging Error Types
//!
//! To format an error together with all its causes in a message, use the [`LogError`] wrapper.
//!
//! ```
//! use tally_log::LogError;
//!
//! let custom_error = std::io::Error::other("oh no!");
//! tally_log::error!("operation failed: {}", LogError(&custom_error));
//! ```
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`] that should be called
//! at the beginning of test method. It enables test mode of the logger and customizes log levels
//! for the current crate.
//!
//! ```ignore
//! #[test]
//! fn test_something() {
//!     tally_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

mod setup;
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
