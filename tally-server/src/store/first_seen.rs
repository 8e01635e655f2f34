use std::path::Path;

use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite};
use tally_event::Event;

use crate::store::sqlite::{SqliteStoreError, connect};

static MIGRATOR: Migrator = sqlx::migrate!("migrations/first_seen");

/// The first event recorded for a user.
#[derive(Clone, Debug, Eq, PartialEq, sqlx::FromRow)]
pub struct FirstSeen {
    /// The user.
    pub username: String,
    /// Metric of the first event.
    pub metric: String,
    /// Count of the first event.
    pub count: i64,
    /// Timestamp of the first event.
    pub timestamp: i64,
}

/// Remembers the first event of every user.
#[derive(Clone, Debug)]
pub struct FirstSeenStore {
    db: Pool<Sqlite>,
}

impl FirstSeenStore {
    /// Opens the database at `path`, creating and migrating it if needed.
    pub async fn open(path: &Path) -> Result<Self, SqliteStoreError> {
        let db = connect(path, &MIGRATOR).await?;
        Ok(Self { db })
    }

    /// Records `event` if it is the first event of its user.
    ///
    /// Returns `true` if the user was not known before. Later events of a known user, including
    /// redeliveries of the first one, leave the record untouched.
    pub async fn record(&self, event: &Event) -> Result<bool, SqliteStoreError> {
        let result = sqlx::query(
            "INSERT INTO first_seen (username, metric, count, timestamp) VALUES (?, ?, ?, ?)
             ON CONFLICT(username) DO NOTHING",
        )
        .bind(&event.username)
        .bind(&event.metric)
        .bind(event.count)
        .bind(event.timestamp)
        .execute(&self.db)
        .await
        .map_err(SqliteStoreError::Write)?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns the first event recorded for `username`.
    pub async fn get(&self, username: &str) -> Result<Option<FirstSeen>, SqliteStoreError> {
        sqlx::query_as(
            "SELECT username, metric, count, timestamp FROM first_seen WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .map_err(SqliteStoreError::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(username: &str, metric: &str, timestamp: i64) -> Event {
        Event {
            username: username.to_owned(),
            metric: metric.to_owned(),
            count: 1,
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_only_first_event_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = FirstSeenStore::open(&dir.path().join("first_seen.db"))
            .await
            .unwrap();

        assert!(store.record(&event("alice", "signup", 100)).await.unwrap());
        assert!(!store.record(&event("alice", "login", 200)).await.unwrap());
        assert!(store.record(&event("bob", "login", 300)).await.unwrap());

        let alice = store.get("alice").await.unwrap().unwrap();
        assert_eq!(alice.metric, "signup");
        assert_eq!(alice.timestamp, 100);
        assert_eq!(store.get("carol").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("first_seen.db");

        let store = FirstSeenStore::open(&path).await.unwrap();
        store.record(&event("alice", "login", 100)).await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("first_seen.db");

        let store = FirstSeenStore::open(&path).await.unwrap();
        store.record(&event("alice", "login", 100)).await.unwrap();
        drop(store);

        let store = FirstSeenStore::open(&path).await.unwrap();
        assert!(!store.record(&event("alice", "login", 200)).await.unwrap());
    }
}
