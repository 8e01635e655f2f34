//! Time-bucketed metric counters.
//!
//! Events are counted per metric into a daily bucket named after the UTC day of their timestamp.
//! A [`Consolidator`] periodically moves daily buckets older than the retention threshold into
//! their monthly bucket and records its progress in a watermark key:
//!
//! ```text
//! metrics-distinct:2024:01:05   {login: 2, logout: 1}   daily bucket
//! metrics-distinct:2024:01      {login: 10}             monthly bucket
//! metrics-distinct:last-merge   2024-01-05              watermark
//! ```
//!
//! All writes that must not interleave with other writers go through a [`Guard`], an optimistic
//! lock over a set of keys. A guard's commit fails with [`StoreError::Conflict`] if any of its
//! keys was modified in the meantime. [`RedisBucketStore`] implements this with `WATCH`, and
//! [`MemoryBucketStore`] with per-key versions.
#![warn(missing_docs)]

mod consolidate;
mod handler;
mod key;
mod memory;
mod redis;
mod statsd;
mod store;
mod watermark;

pub use self::consolidate::*;
pub use self::handler::*;
pub use self::key::*;
pub use self::memory::*;
pub use self::redis::*;
pub use self::store::*;
pub use self::watermark::{InvalidWatermark, format as format_watermark, parse as parse_watermark};
