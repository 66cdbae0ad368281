//! Secure key-value storage for end-to-end-encryption key material.
//!
//! The concrete backend (embedded DB, OS keychain, encrypted file) is a
//! platform choice. Records distinguish raw key material from blobs wrapped
//! by another key so a backend can apply different protection to each.

use crate::error::FastJobResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum KeyRecord {
  /// Raw key material, hex encoded.
  Raw { material_hex: String },
  /// Key material wrapped (encrypted) under another key.
  Wrapped {
    blob_hex: String,
    wrapping_key_id: String,
  },
}

pub trait SecureKeyStore: Send + Sync {
  fn get_key(&self, id: &str) -> FastJobResult<Option<KeyRecord>>;
  fn put_key(&self, id: &str, record: KeyRecord) -> FastJobResult<()>;
  fn delete_key(&self, id: &str) -> FastJobResult<()>;
}

/// In-memory key store, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryKeyStore {
  keys: std::sync::Mutex<std::collections::HashMap<String, KeyRecord>>,
}

impl MemoryKeyStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SecureKeyStore for MemoryKeyStore {
  fn get_key(&self, id: &str) -> FastJobResult<Option<KeyRecord>> {
    let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
    Ok(keys.get(id).cloned())
  }

  fn put_key(&self, id: &str, record: KeyRecord) -> FastJobResult<()> {
    let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
    keys.insert(id.to_string(), record);
    Ok(())
  }

  fn delete_key(&self, id: &str) -> FastJobResult<()> {
    let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
    keys.remove(id);
    Ok(())
  }
}
