use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::store::{BucketStore, Counters, Guard, StoreError, WriteBatch, WriteOp};

#[derive(Clone, Debug)]
enum Value {
    Hash(BTreeMap<String, String>),
    String(String),
}

#[derive(Debug, Default)]
struct Keyspace {
    values: HashMap<String, Value>,
    /// Bumped on every write to a key, including deletion.
    versions: HashMap<String, u64>,
}

impl Keyspace {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or_default()
    }

    fn touch(&mut self, key: &str) {
        *self.versions.entry(key.to_owned()).or_default() += 1;
    }

    fn get(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(value) => Some(value.clone()),
            Value::Hash(_) => None,
        }
    }

    fn read_all(&self, key: &str) -> Result<Counters, StoreError> {
        let Some(Value::Hash(fields)) = self.values.get(key) else {
            return Ok(Counters::new());
        };

        fields
            .iter()
            .map(|(field, value)| match value.parse() {
                Ok(count) => Ok((field.clone(), count)),
                Err(_) => Err(invalid(key, field)),
            })
            .collect()
    }

    fn incr_by(&mut self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let value = self
            .values
            .entry(key.to_owned())
            .or_insert_with(|| Value::Hash(BTreeMap::new()));

        let Value::Hash(fields) = value else {
            return Err(invalid(key, field));
        };

        let current = match fields.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| invalid(key, field))?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| invalid(key, field))?;

        fields.insert(field.to_owned(), next.to_string());
        self.touch(key);
        Ok(next)
    }

    fn apply(&mut self, op: &WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::IncrBy { key, field, delta } => {
                self.incr_by(key, field, *delta)?;
            }
            WriteOp::Delete { key } => {
                if self.values.remove(key).is_some() {
                    self.touch(key);
                }
            }
            WriteOp::Set { key, value } => {
                self.values
                    .insert(key.clone(), Value::String(value.clone()));
                self.touch(key);
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, field: &str) -> StoreError {
    StoreError::InvalidCounter {
        key: key.to_owned(),
        field: field.to_owned(),
    }
}

/// An in-process [`BucketStore`].
///
/// Guards record a version per watched key and fail to commit if any of them changed, which
/// mirrors the semantics of `WATCH` in redis. Clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct MemoryBucketStore {
    inner: Arc<Mutex<Keyspace>>,
}

impl MemoryBucketStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the string at `key`, bypassing any guards.
    pub fn set(&self, key: &str, value: &str) {
        let mut inner = self.inner.lock();
        inner
            .values
            .insert(key.to_owned(), Value::String(value.to_owned()));
        inner.touch(key);
    }

    /// Stores an unparsed hash field, e.g. to simulate corrupt data.
    pub fn insert_raw(&self, key: &str, field: &str, value: &str) {
        let mut inner = self.inner.lock();
        let entry = inner
            .values
            .entry(key.to_owned())
            .or_insert_with(|| Value::Hash(BTreeMap::new()));
        if let Value::Hash(fields) = entry {
            fields.insert(field.to_owned(), value.to_owned());
        }
        inner.touch(key);
    }

    /// Returns all keys currently holding a value, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.lock().values.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl BucketStore for MemoryBucketStore {
    type Guard = MemoryGuard;

    async fn increment(&self, key: &str, metric: &str) -> Result<i64, StoreError> {
        self.inner.lock().incr_by(key, metric, 1)
    }

    async fn read_all(&self, key: &str) -> Result<Counters, StoreError> {
        self.inner.lock().read_all(key)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().get(key))
    }

    async fn guard(&self, keys: &[String]) -> Result<MemoryGuard, StoreError> {
        let inner = self.inner.lock();
        let watched = keys
            .iter()
            .map(|key| (key.clone(), inner.version(key)))
            .collect();

        Ok(MemoryGuard {
            store: self.clone(),
            watched,
        })
    }
}

/// A [`Guard`] of a [`MemoryBucketStore`].
#[derive(Debug)]
pub struct MemoryGuard {
    store: MemoryBucketStore,
    watched: Vec<(String, u64)>,
}

impl Guard for MemoryGuard {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.store.inner.lock().get(key))
    }

    async fn read_all(&mut self, key: &str) -> Result<Counters, StoreError> {
        self.store.inner.lock().read_all(key)
    }

    async fn commit(self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut inner = self.store.inner.lock();

        let modified = self
            .watched
            .iter()
            .any(|(key, version)| inner.version(key) != *version);
        if modified {
            return Err(StoreError::Conflict);
        }

        // Validate on a copy so that a failing batch leaves no partial writes behind.
        let mut staged = Keyspace {
            values: inner.values.clone(),
            versions: inner.versions.clone(),
        };
        for op in batch.ops() {
            staged.apply(op)?;
        }

        *inner = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_increment_counts() {
        let store = MemoryBucketStore::new();
        for _ in 0..3 {
            store.increment("p:2024:03:05", "login").await.unwrap();
        }

        assert_eq!(
            store.read_all("p:2024:03:05").await.unwrap(),
            Counters::from([("login".to_owned(), 3)])
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments() {
        let store = Arc::new(MemoryBucketStore::new());

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment("k", "login").await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.read_all("k").await.unwrap()["login"], 100);
    }

    #[tokio::test]
    async fn test_missing_key_is_empty() {
        let store = MemoryBucketStore::new();
        assert!(store.read_all("missing").await.unwrap().is_empty());
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_guard_commits() {
        let store = MemoryBucketStore::new();
        let mut guard = store.guard(&["w".to_owned()]).await.unwrap();
        assert_eq!(guard.get("w").await.unwrap(), None);

        let mut batch = WriteBatch::new();
        batch.set("w", "2024-01-01");
        guard.commit(batch).await.unwrap();

        assert_eq!(store.get("w").await.unwrap().as_deref(), Some("2024-01-01"));
    }

    #[tokio::test]
    async fn test_guard_conflict_writes_nothing() {
        let store = MemoryBucketStore::new();
        let guard = store
            .guard(&["w".to_owned(), "m".to_owned()])
            .await
            .unwrap();

        store.set("w", "2024-02-01");

        let mut batch = WriteBatch::new();
        batch.incr_by("m", "login", 1);
        batch.set("w", "2024-01-01");
        let result = guard.commit(batch).await;

        assert!(matches!(result, Err(StoreError::Conflict)));
        assert_eq!(store.get("w").await.unwrap().as_deref(), Some("2024-02-01"));
        assert!(store.read_all("m").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guard_ignores_unwatched_keys() {
        let store = MemoryBucketStore::new();
        let guard = store.guard(&["w".to_owned()]).await.unwrap();

        store.increment("other", "login").await.unwrap();

        let mut batch = WriteBatch::new();
        batch.set("w", "2024-01-01");
        guard.commit(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_deleting_missing_key_is_not_a_write() {
        let store = MemoryBucketStore::new();
        let guard = store.guard(&["d".to_owned()]).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.delete("d");
        store.guard(&[]).await.unwrap().commit(batch).await.unwrap();

        guard.commit(WriteBatch::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_batch_is_not_applied() {
        let store = MemoryBucketStore::new();
        store.insert_raw("m", "login", "many");

        let guard = store.guard(&["m".to_owned()]).await.unwrap();
        let mut batch = WriteBatch::new();
        batch.set("w", "2024-01-01");
        batch.incr_by("m", "login", 1);

        let result = guard.commit(batch).await;
        assert!(matches!(result, Err(StoreError::InvalidCounter { .. })));
        assert_eq!(store.get("w").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys() {
        let store = MemoryBucketStore::new();
        store.increment("b", "login").await.unwrap();
        store.set("a", "x");
        assert_eq!(store.keys(), ["a", "b"]);
    }
}
