//! In-memory storage backend.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{resolve_lookup, StorageBackend};
use crate::error::Result;

// == Memory Storage ==
/// Process-local backend keeping the mapping in a `RwLock`-guarded map.
///
/// Nothing survives the process; useful for tests and ephemeral caches.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<Map<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with `data`.
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Number of physical rows currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str, default: Option<Value>) -> Result<Value> {
        let data = self.data.read().await;
        resolve_lookup(&data, key, default)
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().await.remove(key);
        Ok(())
    }
}
