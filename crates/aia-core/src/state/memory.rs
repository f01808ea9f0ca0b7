// # Memory Record Store
//
// In-memory implementation of ClusterRecordStore.
//
// ## Purpose
//
// Provides a record store that doesn't persist across restarts. Creation is
// atomic under the write lock, so concurrent bootstraps against the same
// store behave like replicas racing on the cluster API.
//
// ## When to Use
//
// - Testing environments
// - Single-process deployments where the cluster identity may change on restart

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use async_trait::async_trait;

use crate::traits::record_store::ClusterRecordStore;
use crate::Error;

/// In-memory cluster record store
///
/// # Example
///
/// ```rust,no_run
/// use aia_core::state::MemoryRecordStore;
/// use aia_core::traits::ClusterRecordStore;
/// use std::collections::BTreeMap;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryRecordStore::new();
///
///     let data = BTreeMap::from([("key".to_string(), "value".to_string())]);
///     store.create_record("identity", data).await?;
///
///     let record = store.get_record("identity").await?;
///     assert!(record.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<RwLock<HashMap<String, BTreeMap<String, String>>>>,
}

impl MemoryRecordStore {
    /// Create a new empty memory record store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ClusterRecordStore for MemoryRecordStore {
    async fn get_record(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(name).cloned())
    }

    async fn create_record(&self, name: &str, data: BTreeMap<String, String>) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(name) {
            return Err(Error::already_exists(format!("record {name}")));
        }
        guard.insert(name.to_string(), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_create_and_get() {
        let store = MemoryRecordStore::new();
        assert!(store.is_empty().await);

        let data = BTreeMap::from([("k".to_string(), "v".to_string())]);
        store.create_record("r", data.clone()).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get_record("r").await.unwrap(), Some(data));
        assert_eq!(store.get_record("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_second_create_fails() {
        let store = MemoryRecordStore::new();
        store.create_record("r", BTreeMap::new()).await.unwrap();

        let err = store.create_record("r", BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }
}
