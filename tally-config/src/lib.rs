//! Configuration for the Tally CLI and services.
//!
//! The configuration is read from `config.yml` in a config folder. Every section is optional and
//! falls back to defaults, so an empty or missing section runs all workers against local
//! infrastructure. Selected values can be overridden from the command line or the environment
//! through [`OverridableConfig`].
#![warn(missing_docs)]

mod config;

pub use self::config::*;
