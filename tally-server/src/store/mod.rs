//! SQLite backed stores of the first-seen and raw-log workers.

mod first_seen;
mod raw_log;
mod sqlite;

pub use self::first_seen::*;
pub use self::raw_log::*;
pub use self::sqlite::SqliteStoreError;
