//! Durable client-side key-value storage.
//!
//! The chat stores persist small JSON snapshots (unread counters, key
//! material references) through this capability. The concrete backend is an
//! implementation choice per platform; a JSON file and an in-memory map are
//! provided here.

use crate::error::{FastJobErrorExt, FastJobErrorType, FastJobResult};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait KeyValueStorage: Send + Sync {
  fn get(&self, key: &str) -> FastJobResult<Option<Value>>;
  fn set(&self, key: &str, value: Value) -> FastJobResult<()>;
  fn remove(&self, key: &str) -> FastJobResult<()>;
}

/// Typed helpers over the raw JSON surface.
pub trait KeyValueStorageExt: KeyValueStorage {
  fn get_value<T: DeserializeOwned>(&self, key: &str) -> FastJobResult<Option<T>> {
    match self.get(key)? {
      Some(v) => {
        let parsed = serde_json::from_value(v)
          .with_fastjob_type(FastJobErrorType::DeserializationFailed)?;
        Ok(Some(parsed))
      }
      None => Ok(None),
    }
  }

  fn set_value<T: Serialize>(&self, key: &str, value: &T) -> FastJobResult<()> {
    let v = serde_json::to_value(value).with_fastjob_type(FastJobErrorType::SerializationFailed)?;
    self.set(key, v)
  }
}

impl<S: KeyValueStorage + ?Sized> KeyValueStorageExt for S {}

#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KeyValueStorage for MemoryStorage {
  fn get(&self, key: &str) -> FastJobResult<Option<Value>> {
    let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: Value) -> FastJobResult<()> {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.insert(key.to_string(), value);
    Ok(())
  }

  fn remove(&self, key: &str) -> FastJobResult<()> {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.remove(key);
    Ok(())
  }
}

/// Single JSON file holding a flat `{key: value}` map, rewritten on every
/// mutation. Snapshots here are small (a handful of counters), so the full
/// rewrite is acceptable.
pub struct JsonFileStorage {
  path: PathBuf,
  cache: Mutex<HashMap<String, Value>>,
}

impl JsonFileStorage {
  pub fn open(path: impl Into<PathBuf>) -> FastJobResult<Self> {
    let path = path.into();
    let cache = match std::fs::read_to_string(&path) {
      Ok(raw) => serde_json::from_str(&raw)
        .with_fastjob_type(FastJobErrorType::DeserializationFailed)?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        tracing::debug!(path = %path.display(), "storage file not found, starting empty");
        HashMap::new()
      }
      Err(e) => return Err(e).with_fastjob_type(FastJobErrorType::StorageReadFailed),
    };
    Ok(Self {
      path,
      cache: Mutex::new(cache),
    })
  }

  fn flush(&self, cache: &HashMap<String, Value>) -> FastJobResult<()> {
    let raw =
      serde_json::to_string(cache).with_fastjob_type(FastJobErrorType::SerializationFailed)?;
    std::fs::write(&self.path, raw).with_fastjob_type(FastJobErrorType::StorageWriteFailed)
  }
}

impl KeyValueStorage for JsonFileStorage {
  fn get(&self, key: &str) -> FastJobResult<Option<Value>> {
    let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
    Ok(cache.get(key).cloned())
  }

  fn set(&self, key: &str, value: Value) -> FastJobResult<()> {
    let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
    cache.insert(key.to_string(), value);
    self.flush(&cache)
  }

  fn remove(&self, key: &str) -> FastJobResult<()> {
    let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
    cache.remove(key);
    self.flush(&cache)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  #[test]
  fn memory_roundtrip() -> FastJobResult<()> {
    let storage = MemoryStorage::new();
    assert_eq!(storage.get("missing")?, None);
    storage.set("k", json!({"a": 1}))?;
    assert_eq!(storage.get("k")?, Some(json!({"a": 1})));
    storage.remove("k")?;
    assert_eq!(storage.get("k")?, None);
    Ok(())
  }

  #[test]
  fn typed_helpers() -> FastJobResult<()> {
    let storage = MemoryStorage::new();
    storage.set_value("counts", &vec![1, 2, 3])?;
    let back: Option<Vec<i32>> = storage.get_value("counts")?;
    assert_eq!(back, Some(vec![1, 2, 3]));
    Ok(())
  }

  #[test]
  fn file_storage_survives_reopen() -> FastJobResult<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("store.json");
    {
      let storage = JsonFileStorage::open(&path)?;
      storage.set("k", json!(42))?;
    }
    let storage = JsonFileStorage::open(&path)?;
    assert_eq!(storage.get("k")?, Some(json!(42)));
    Ok(())
  }
}
