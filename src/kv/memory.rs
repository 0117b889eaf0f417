//! Process-local run record store for registries that need no durable mirror.
//!
//! Backs [`crate::job::JobRegistry::in_memory`]: records of finished runs stay
//! answerable by `status` for the lifetime of the process and are gone after a
//! restart. Use [`super::FsKvStore`] when records must survive one.

use super::KvStore;
use crate::Result;
use dashmap::DashMap;

/// Concurrent in-memory key-value store.
///
/// # Example
///
/// ```rust
/// use trueno_ml::kv::{KvStore, MemoryKvStore};
///
/// # async fn example() -> trueno_ml::Result<()> {
/// let store = MemoryKvStore::new();
/// store.set("run-1/run.json", b"{}".to_vec()).await?;
/// assert_eq!(store.keys_under("run-1"), vec!["run-1/run.json"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    records: DashMap<String, Vec<u8>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorted keys inside the `<namespace>/` directory, e.g. one run's records.
    #[must_use]
    pub fn keys_under(&self, namespace: &str) -> Vec<String> {
        let prefix = format!("{}/", namespace.trim_end_matches('/'));
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|record| record.key().starts_with(&prefix))
            .map(|record| record.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.records.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.records.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keys_under_namespace() {
        let store = MemoryKvStore::new();
        store.set("run-2/run.json", vec![]).await.unwrap();
        store.set("run-1/run.json", vec![1]).await.unwrap();
        store.set("run-10/run.json", vec![2]).await.unwrap();
        assert_eq!(store.keys_under("run-1"), vec!["run-1/run.json"]);
        assert_eq!(store.keys_under("run-1/"), vec!["run-1/run.json"]);
        assert!(store.keys_under("run-3").is_empty());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_overwrite_and_delete() {
        let store = MemoryKvStore::new();
        store.set("r/run.json", b"a".to_vec()).await.unwrap();
        store.set("r/run.json", b"b".to_vec()).await.unwrap();
        assert_eq!(store.get("r/run.json").await.unwrap(), Some(b"b".to_vec()));
        store.delete("r/run.json").await.unwrap();
        store.delete("r/run.json").await.unwrap();
        assert!(!store.exists("r/run.json").await.unwrap());
        assert!(store.is_empty());
    }
}
