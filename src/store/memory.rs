//! In-memory store for tests and ephemeral runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::Store;

/// A `Store` backed by a `BTreeMap`. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save(&self, key: &str, record: &serde_json::Value) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }
        self.records
            .write()
            .await
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_and_prefix_list() {
        let store = MemoryStore::new();
        store.save("a:1", &serde_json::json!(1)).await.unwrap();
        store.save("a:2", &serde_json::json!(2)).await.unwrap();
        store.save("b:1", &serde_json::json!(3)).await.unwrap();

        assert_eq!(store.load("a:1").await.unwrap(), Some(serde_json::json!(1)));
        assert_eq!(store.list("a:").await.unwrap().len(), 2);
        assert!(store.delete("a:1").await.unwrap());
        assert!(store.load("a:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_key_rejected() {
        let store = MemoryStore::new();
        assert!(store.save("", &serde_json::json!(null)).await.is_err());
    }
}
