//! Storage Module
//!
//! The flat, non-expiring key-value store the cache layer is built on.
//!
//! Backends persist a mapping from string key to arbitrary JSON value. The
//! empty key is reserved: `get("")` returns the whole mapping as an object.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{CacheError, Result};

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Key that selects the entire mapping on `get`.
pub const ALL_KEYS: &str = "";

// == Storage Backend ==
/// Async key-value store consumed by the cache manager.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Returns the value stored under `key`.
    ///
    /// When the key is absent, resolves to `default` if one was supplied and
    /// fails with [`CacheError::NotFound`] otherwise. `key == ""` returns the
    /// entire mapping as a JSON object.
    async fn get(&self, key: &str, default: Option<Value>) -> Result<Value>;

    /// Upserts `key` with `value`.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removes `key`. Succeeds when the key is already absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Returns the entire stored mapping.
    async fn get_all(&self) -> Result<Map<String, Value>> {
        match self.get(ALL_KEYS, None).await? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(CacheError::InvalidFormat(format!(
                "expected an object from get-all, found {}",
                json_type_name(&other)
            ))),
        }
    }
}

/// Resolves a single-key lookup against a snapshot of the mapping.
pub(crate) fn resolve_lookup(
    data: &Map<String, Value>,
    key: &str,
    default: Option<Value>,
) -> Result<Value> {
    if key == ALL_KEYS {
        return Ok(Value::Object(data.clone()));
    }

    match data.get(key) {
        Some(value) => Ok(value.clone()),
        None => default.ok_or_else(|| CacheError::NotFound(key.to_string())),
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
