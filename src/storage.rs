// src/storage.rs
//
// Persistent key-value storage for the client: the session token, the remembered
// username and the per-month payroll generation flags. Values are strings; typed
// values go through `get_json` / `set_json`.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{io_context, Result, RrhhError};

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

fn lock_entries(
    entries: &Mutex<BTreeMap<String, String>>,
) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
    entries
        .lock()
        .map_err(|_| RrhhError::Config("storage lock poisoned".to_string()))
}

/// Store backed by a single pretty-printed JSON object on disk.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = Self::load_entries(&path)?;
        debug!("Opened state file {:?} ({} keys)", path, entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn load_entries(path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let json_string = fs::read_to_string(path)
            .map_err(|e| io_context(e, format!("Failed to read state file: {:?}", path)))?;
        if json_string.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&json_string) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // A corrupt file behaves like cleared storage.
                warn!("State file {:?} is not valid JSON ({}), starting empty", path, e);
                Ok(BTreeMap::new())
            }
        }
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(entries)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    io_context(
                        e,
                        format!("Failed to create directory for state file: {:?}", parent),
                    )
                })?;
            }
        }

        let mut file = File::create(&self.path).map_err(|e| {
            io_context(e, format!("Failed to create state file: {:?}", self.path))
        })?;
        file.write_all(json_string.as_bytes()).map_err(|e| {
            io_context(e, format!("Failed to write state file: {:?}", self.path))
        })?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock_entries(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = lock_entries(&self.entries)?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = lock_entries(&self.entries)?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

/// In-memory store, used by tests and one-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock_entries(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock_entries(&self.entries)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock_entries(&self.entries)?.remove(key);
        Ok(())
    }
}
