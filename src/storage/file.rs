//! JSON file storage backend.
//!
//! The whole mapping lives in one JSON object file. Every operation reads the
//! file, and mutating operations rewrite it in full.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{json_type_name, resolve_lookup, StorageBackend};
use crate::error::{CacheError, Result};

// == File Storage ==
/// Backend persisting the mapping as a pretty-printed JSON object.
///
/// A missing or blank file reads as an empty mapping. Read-modify-write
/// cycles are serialized through `io_lock`.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // == Read ==
    async fn read_storage(&self) -> Result<Map<String, Value>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(err.into()),
        };

        if text.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&text)? {
            Value::Object(map) => Ok(map),
            other => Err(CacheError::InvalidFormat(format!(
                "{} holds a JSON {}, expected an object",
                self.path.display(),
                json_type_name(&other)
            ))),
        }
    }

    // == Write ==
    /// Writes to a sibling temp file first so a crash never leaves a
    /// truncated mapping behind.
    async fn write_storage(&self, data: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let text = serde_json::to_string_pretty(data)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, text).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), rows = data.len(), "storage file written");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str, default: Option<Value>) -> Result<Value> {
        let _guard = self.io_lock.lock().await;
        let data = self.read_storage().await?;
        resolve_lookup(&data, key, default)
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut data = self.read_storage().await?;
        data.insert(key.to_string(), value);
        self.write_storage(&data).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut data = self.read_storage().await?;
        if data.remove(key).is_none() {
            return Ok(());
        }
        self.write_storage(&data).await
    }
}
