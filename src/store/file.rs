//! File-backed store, one JSON file per key.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::Store;

/// Stores each record as `<root>/<encoded-key>.json`.
///
/// Keys are encoded so that `:` and `/` cannot escape the root directory.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }
        Ok(self.root.join(format!("{}.json", encode_key(key))))
    }
}

/// Encode a key into a safe file name component.
fn encode_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            ':' => '=',
            _ => '_',
        })
        .collect()
}

#[async_trait]
impl Store for JsonFileStore {
    async fn save(&self, key: &str, record: &serde_json::Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let bytes = serde_json::to_vec_pretty(record)?;
        // Write to a temp file then rename so readers never see a torn record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError> {
        let encoded_prefix = encode_key(prefix);
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if !stem.starts_with(&encoded_prefix) {
                continue;
            }
            let bytes = tokio::fs::read(entry.path()).await?;
            match serde_json::from_slice(&bytes) {
                Ok(value) => records.push((stem.replace('=', ":"), value)),
                Err(e) => {
                    tracing::warn!(file = %name, "Skipping unreadable store record: {}", e);
                }
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        let record = serde_json::json!({"name": "backup", "count": 3});
        store.save("job:abc", &record).await.unwrap();

        let loaded = store.load("job:abc").await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn load_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(store.load("job:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        store
            .save("task:alpha", &serde_json::json!({"n": 1}))
            .await
            .unwrap();
        store
            .save("task:beta", &serde_json::json!({"n": 2}))
            .await
            .unwrap();
        store
            .save("job:gamma", &serde_json::json!({"n": 3}))
            .await
            .unwrap();

        let tasks = store.list("task:").await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].0, "task:alpha");
        assert_eq!(tasks[1].0, "task:beta");
    }

    #[tokio::test]
    async fn delete_existing_and_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        store.save("workflow:x", &serde_json::json!({})).await.unwrap();
        assert!(store.delete("workflow:x").await.unwrap());
        assert!(!store.delete("workflow:x").await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        store.save("k", &serde_json::json!({"v": 1})).await.unwrap();
        store.save("k", &serde_json::json!({"v": 2})).await.unwrap();
        let loaded = store.load("k").await.unwrap().unwrap();
        assert_eq!(loaded["v"], 2);
    }

    #[test]
    fn key_encoding_is_path_safe() {
        assert_eq!(encode_key("job:abc-123"), "job=abc-123");
        assert!(!encode_key("../../etc/passwd").contains('/'));
    }
}
