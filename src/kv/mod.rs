//! Key-value persistence for run records and small artifacts.
//!
//! Keys are `/`-separated paths such as `<run_id>/run.json`. Two backends:
//! - [`MemoryKvStore`]: `DashMap`-backed, lost on restart (`JobRegistry::in_memory`)
//! - [`FsKvStore`]: one file per key under a root directory (the durable store)
//!
//! # Example
//!
//! ```rust,no_run
//! use trueno_ml::kv::{KvStore, MemoryKvStore};
//!
//! # async fn example() -> trueno_ml::Result<()> {
//! let store = MemoryKvStore::new();
//!
//! store.set("run-1/run.json", b"{}".to_vec()).await?;
//! assert!(store.exists("run-1/run.json").await?);
//!
//! store.set_json("run-1/summary.json", &vec![1, 2, 3]).await?;
//! let summary: Option<Vec<i32>> = store.get_json("run-1/summary.json").await?;
//! assert_eq!(summary, Some(vec![1, 2, 3]));
//! # Ok(())
//! # }
//! ```

mod fs;
mod memory;

pub use fs::FsKvStore;
pub use memory::MemoryKvStore;

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;

/// Async key-value store used as the durable mirror of the run registry.
pub trait KvStore: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Set a value for a key.
    ///
    /// Overwrites any existing value.
    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Delete a key.
    ///
    /// No-op if the key doesn't exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if a key exists.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Get and deserialize a JSON value.
    fn get_json<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<T>>> + Send {
        async move {
            match self.get(key).await? {
                Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                None => Ok(None),
            }
        }
    }

    /// Serialize a value as pretty JSON and store it.
    fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let bytes = serde_json::to_vec_pretty(value)?;
            self.set(key, bytes).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: String,
        score: f64,
    }

    async fn exercise<S: KvStore>(store: &S) {
        assert_eq!(store.get("r1/run.json").await.unwrap(), None);

        store.set("r1/run.json", b"v1".to_vec()).await.unwrap();
        store.set("r1/run.json", b"v2".to_vec()).await.unwrap();
        assert_eq!(
            store.get("r1/run.json").await.unwrap(),
            Some(b"v2".to_vec())
        );
        assert!(store.exists("r1/run.json").await.unwrap());

        store.delete("r1/run.json").await.unwrap();
        assert!(!store.exists("r1/run.json").await.unwrap());
        // Deleting twice is fine
        store.delete("r1/run.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        exercise(&MemoryKvStore::new()).await;
    }

    #[tokio::test]
    async fn test_fs_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FsKvStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryKvStore::new();
        let record = Record {
            id: "r1".to_string(),
            score: 0.5,
        };
        store.set_json("r1/record.json", &record).await.unwrap();

        let loaded: Option<Record> = store.get_json("r1/record.json").await.unwrap();
        assert_eq!(loaded, Some(record));

        let missing: Option<Record> = store.get_json("r2/record.json").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_get_json_rejects_garbage() {
        let store = MemoryKvStore::new();
        store.set("bad.json", b"not json".to_vec()).await.unwrap();
        let result: Result<Option<Record>> = store.get_json("bad.json").await;
        assert!(matches!(result, Err(crate::Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_memory_kv_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(MemoryKvStore::new());
        let mut handles = vec![];

        for i in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let key = format!("run{i}/run.json");
                store.set(&key, format!("{i}").into_bytes()).await.unwrap();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
        for i in 0..100 {
            let key = format!("run{i}/run.json");
            assert_eq!(
                store.get(&key).await.unwrap(),
                Some(format!("{i}").into_bytes())
            );
        }
    }
}
