//! Persistence: backend-agnostic key-value store for engine records.
//!
//! Components keep their live state in memory; the store is a best-effort
//! durable mirror for job history, the recurring-task registry, and workflow
//! definitions/executions. Keys are flat strings with a `kind:` prefix
//! (`job:`, `task:`, `workflow:`, `execution:`).

mod file;
mod memory;

use async_trait::async_trait;

use crate::error::StoreError;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Backend-agnostic async store trait.
#[async_trait]
pub trait Store: Send + Sync {
    /// Save a record under a key, overwriting any existing record.
    async fn save(&self, key: &str, record: &serde_json::Value) -> Result<(), StoreError>;

    /// Load a record by key, `None` if absent.
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// List all records whose key starts with `prefix`, as `(key, record)` pairs.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError>;

    /// Delete a record. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}
