use std::path::Path;

use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite};
use tally_event::Event;

use crate::store::sqlite::{SqliteStoreError, connect};

static MIGRATOR: Migrator = sqlx::migrate!("migrations/raw_log");

/// Aggregated `count` values of one metric.
#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct MetricSummary {
    /// The metric.
    pub metric: String,
    /// Smallest `count` of all events.
    pub minimum: i64,
    /// Largest `count` of all events.
    pub maximum: i64,
    /// Mean `count` of all events.
    pub average: f64,
    /// Number of events.
    pub events: i64,
}

/// Aggregated `count` values of one metric for one user.
#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct UserMetricSummary {
    /// The user.
    pub username: String,
    /// The metric.
    pub metric: String,
    /// Smallest `count` of all events.
    pub minimum: i64,
    /// Largest `count` of all events.
    pub maximum: i64,
    /// Mean `count` of all events.
    pub average: f64,
    /// Number of events.
    pub events: i64,
}

/// Short-lived log of raw events.
///
/// Every consumed event is appended. Events are removed in bulk by [`purge`](Self::purge) once
/// they are older than the retention.
#[derive(Clone, Debug)]
pub struct RawLogStore {
    db: Pool<Sqlite>,
}

impl RawLogStore {
    /// Opens the database at `path`, creating and migrating it if needed.
    pub async fn open(path: &Path) -> Result<Self, SqliteStoreError> {
        let db = connect(path, &MIGRATOR).await?;
        Ok(Self { db })
    }

    /// Appends an event.
    pub async fn insert(&self, event: &Event) -> Result<(), SqliteStoreError> {
        sqlx::query("INSERT INTO raw_events (username, metric, count, timestamp) VALUES (?, ?, ?, ?)")
            .bind(&event.username)
            .bind(&event.metric)
            .bind(event.count)
            .bind(event.timestamp)
            .execute(&self.db)
            .await
            .map_err(SqliteStoreError::Write)?;

        Ok(())
    }

    /// Deletes all events with a timestamp before `cutoff` and returns how many were deleted.
    pub async fn purge(&self, cutoff: i64) -> Result<u64, SqliteStoreError> {
        let result = sqlx::query("DELETE FROM raw_events WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.db)
            .await
            .map_err(SqliteStoreError::Write)?;

        Ok(result.rows_affected())
    }

    /// Aggregates events at or after `since` per metric.
    pub async fn totals(&self, since: i64) -> Result<Vec<MetricSummary>, SqliteStoreError> {
        sqlx::query_as(
            "SELECT metric,
                    MIN(count) AS minimum,
                    MAX(count) AS maximum,
                    AVG(count) AS average,
                    COUNT(*) AS events
             FROM raw_events
             WHERE timestamp >= ?
             GROUP BY metric
             ORDER BY metric",
        )
        .bind(since)
        .fetch_all(&self.db)
        .await
        .map_err(SqliteStoreError::Read)
    }

    /// Aggregates events at or after `since` per user and metric.
    pub async fn per_user(&self, since: i64) -> Result<Vec<UserMetricSummary>, SqliteStoreError> {
        sqlx::query_as(
            "SELECT username,
                    metric,
                    MIN(count) AS minimum,
                    MAX(count) AS maximum,
                    AVG(count) AS average,
                    COUNT(*) AS events
             FROM raw_events
             WHERE timestamp >= ?
             GROUP BY username, metric
             ORDER BY username, metric",
        )
        .bind(since)
        .fetch_all(&self.db)
        .await
        .map_err(SqliteStoreError::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(username: &str, metric: &str, count: i64, timestamp: i64) -> Event {
        Event {
            username: username.to_owned(),
            metric: metric.to_owned(),
            count,
            timestamp,
        }
    }

    async fn store(dir: &tempfile::TempDir) -> RawLogStore {
        RawLogStore::open(&dir.path().join("raw_log.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_purge_deletes_before_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store.insert(&event("alice", "login", 1, 100)).await.unwrap();
        store.insert(&event("alice", "login", 1, 200)).await.unwrap();
        store.insert(&event("bob", "login", 1, 300)).await.unwrap();

        assert_eq!(store.purge(200).await.unwrap(), 1);
        assert_eq!(store.purge(200).await.unwrap(), 0);
        assert_eq!(store.totals(0).await.unwrap()[0].events, 2);
    }

    #[tokio::test]
    async fn test_totals() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store.insert(&event("alice", "login", 2, 100)).await.unwrap();
        store.insert(&event("bob", "login", 4, 110)).await.unwrap();
        store.insert(&event("bob", "click", 7, 120)).await.unwrap();
        store.insert(&event("bob", "click", 9, 10)).await.unwrap();

        let totals = store.totals(50).await.unwrap();
        assert_eq!(
            totals,
            [
                MetricSummary {
                    metric: "click".to_owned(),
                    minimum: 7,
                    maximum: 7,
                    average: 7.0,
                    events: 1,
                },
                MetricSummary {
                    metric: "login".to_owned(),
                    minimum: 2,
                    maximum: 4,
                    average: 3.0,
                    events: 2,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store.insert(&event("bob", "login", 1, 100)).await.unwrap();
        store.insert(&event("alice", "login", 3, 100)).await.unwrap();
        store.insert(&event("alice", "login", 5, 100)).await.unwrap();

        let per_user = store.per_user(0).await.unwrap();
        let rows: Vec<_> = per_user
            .iter()
            .map(|row| (row.username.as_str(), row.metric.as_str(), row.average, row.events))
            .collect();

        assert_eq!(rows, [("alice", "login", 4.0, 2), ("bob", "login", 1.0, 1)]);
    }

    #[tokio::test]
    async fn test_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        assert!(store.totals(0).await.unwrap().is_empty());
        assert!(store.per_user(0).await.unwrap().is_empty());
    }
}
