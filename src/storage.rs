use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{CycleHistory, Settings};

/// Key under which the date -> entry map is stored.
pub const HISTORY_KEY: &str = "cycleData";
pub const SETTINGS_KEY: &str = "settings";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("data directory not found")]
    NoDataDir,
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("storage lock poisoned")]
    LockPoisoned,
}

/// String-keyed blob storage provided by the host.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().map_err(|_| StorageError::LockPoisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().map_err(|_| StorageError::LockPoisoned)?;
        values.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Store rooted in the platform's local data directory.
    pub fn default_location() -> Result<Self, StorageError> {
        let dir = dirs::data_local_dir()
            .ok_or(StorageError::NoDataDir)?
            .join("clever-cycle");
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::write(path, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn load_json<T, S>(store: &S, key: &str) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.get(key)? {
        Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
        None => Ok(None),
    }
}

fn save_json<T, S>(store: &S, key: &str, value: &T) -> Result<(), StorageError>
where
    T: Serialize,
    S: KeyValueStore + ?Sized,
{
    let blob = serde_json::to_string(value)?;
    store.set(key, &blob)
}

/// Load the cycle history, empty if nothing has been stored yet.
pub fn load_history<S: KeyValueStore + ?Sized>(store: &S) -> Result<CycleHistory, StorageError> {
    let history = load_json::<CycleHistory, _>(store, HISTORY_KEY)?.unwrap_or_default();
    info!("loaded cycle history with {} entries", history.len());
    Ok(history)
}

pub fn save_history<S: KeyValueStore + ?Sized>(
    store: &S,
    history: &CycleHistory,
) -> Result<(), StorageError> {
    save_json(store, HISTORY_KEY, history)?;
    info!("saved cycle history with {} entries", history.len());
    Ok(())
}

pub fn load_settings<S: KeyValueStore + ?Sized>(store: &S) -> Result<Settings, StorageError> {
    Ok(load_json::<Settings, _>(store, SETTINGS_KEY)?.unwrap_or_default())
}

pub fn save_settings<S: KeyValueStore + ?Sized>(
    store: &S,
    settings: &Settings,
) -> Result<(), StorageError> {
    save_json(store, SETTINGS_KEY, settings)
}

/// Delete everything this crate stores.
pub fn wipe<S: KeyValueStore + ?Sized>(store: &S) -> Result<(), StorageError> {
    store.remove(HISTORY_KEY)?;
    store.remove(SETTINGS_KEY)
}
