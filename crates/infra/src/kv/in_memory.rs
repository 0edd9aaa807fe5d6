//! In-memory key-value store for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{KeyValueStore, KvError};

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Hash(HashMap<String, String>),
}

/// Process-local store with Redis semantics for the primitives we use.
///
/// Availability can be switched off to exercise fail-closed paths: while
/// unavailable every operation returns [`KvError::Unavailable`] and nothing
/// is mutated.
#[derive(Debug)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulate the store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether any value (string or hash) is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    fn check_available(&self) -> Result<(), KvError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KvError::Unavailable("in-memory store switched off".to_string()))
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Entry>>, KvError> {
        self.check_available()?;
        self.entries
            .read()
            .map_err(|_| KvError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Entry>>, KvError> {
        self.check_available()?;
        self.entries
            .write()
            .map_err(|_| KvError::Unavailable("store lock poisoned".to_string()))
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> KvError {
    KvError::Command(format!(
        "WRONGTYPE operation against a key holding the wrong kind of value: {key}"
    ))
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, KvError> {
        let mut entries = self.write()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::Str(value.to_string()));
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.write()?;
        entries.insert(key.to_string(), Entry::Str(value.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let entries = self.read()?;
        match entries.get(key) {
            Some(Entry::Str(value)) => Ok(Some(value.clone())),
            Some(Entry::Hash(_)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.write()?;
        entries.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let mut entries = self.write()?;
        match entries.get(key) {
            Some(Entry::Str(value)) if value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.write()?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        match entry {
            Entry::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Entry::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        let entries = self.read()?;
        match entries.get(key) {
            Some(Entry::Hash(fields)) => Ok(fields.clone()),
            Some(Entry::Str(_)) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_keys(&self, key: &str) -> Result<Vec<String>, KvError> {
        let entries = self.read()?;
        match entries.get(key) {
            Some(Entry::Hash(fields)) => Ok(fields.keys().cloned().collect()),
            Some(Entry::Str(_)) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }
}
