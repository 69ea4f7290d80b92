//! Client-side key/value cache used by dashboard widgets.
//!
//! Values are opaque strings, usually JSON documents. Keys are kept in an
//! ordered map so the per-product analysis entries can be read back with a
//! range over their shared prefix instead of a scan of every key.

pub mod keys;

use crate::errors::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<bool>;
    /// All entries whose key starts with `prefix`, in key order.
    fn entries_with_prefix(&self, prefix: &str) -> Vec<(String, String)>;
}

/// Reads `key` as JSON. Absent or malformed entries both yield `None`; the latter is logged.
pub fn read_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(key = %key, error = %error, "ignoring malformed local store entry");
            None
        }
    }
}

pub fn write_json<T: Serialize>(store: &dyn LocalStore, key: &str, value: &T) -> AppResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().map(|entries| entries.clone()).unwrap_or_default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::Storage("local store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::Storage("local store lock poisoned".to_string()))?;
        Ok(entries.remove(key).is_some())
    }

    fn entries_with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        match self.entries.read() {
            Ok(entries) => prefix_range(&entries, prefix),
            Err(_) => Vec::new(),
        }
    }
}

/// Local store persisted as a single JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entries = if path.is_file() {
            let raw = fs::read_to_string(path)?;
            match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "local store file unreadable, starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> AppResult<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl LocalStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::Storage("local store lock poisoned".to_string()))?;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(error) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(AppError::Storage(format!("failed to persist '{}': {}", key, error)));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::Storage("local store lock poisoned".to_string()))?;
        let Some(previous) = entries.remove(key) else {
            return Ok(false);
        };
        if let Err(error) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(AppError::Storage(format!("failed to persist removal of '{}': {}", key, error)));
        }
        Ok(true)
    }

    fn entries_with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        match self.entries.read() {
            Ok(entries) => prefix_range(&entries, prefix),
            Err(_) => Vec::new(),
        }
    }
}

fn prefix_range(entries: &BTreeMap<String, String>, prefix: &str) -> Vec<(String, String)> {
    entries
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
