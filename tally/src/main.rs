//! The Tally binary.
//!
//! Tally runs as a set of cooperating processes sharing one configuration folder:
//!
//! - `tally run collector` accepts events over HTTP and publishes them to Kafka.
//! - `tally run distinct` counts events per metric in daily Redis buckets and consolidates old
//!   buckets into monthly ones.
//! - `tally run first-seen` remembers the first event of every user.
//! - `tally run raw-log` keeps every event for a limited time and purges expired ones.
//!
//! Each worker joins its own consumer group, so every worker sees every event. Run `tally
//! --help` for all options. Most options can also be set through `TALLY_*` environment
//! variables.

mod cli;
mod cliapp;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            tally_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
