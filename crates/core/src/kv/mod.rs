pub mod redb_store;

pub use redb_store::RedbKvStore;

use crate::error::StoreResult;
use crate::types::{validate_memory_key, MemoryEntry};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Key/value memory shared by every client of the server
pub trait KvStore: Send + Sync {
    /// Insert or replace a value
    fn set(&self, key: &str, value: &str) -> StoreResult<MemoryEntry>;

    fn get(&self, key: &str) -> StoreResult<Option<MemoryEntry>>;

    /// Returns true when an entry was removed
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Entries ordered by key, optionally restricted to a key prefix
    fn list(&self, prefix: Option<&str>) -> StoreResult<Vec<MemoryEntry>>;
}

/// Key/value memory held in process memory
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> crate::error::StoreError {
    crate::error::StoreError::Backend("memory store lock poisoned".to_string())
}

impl KvStore for InMemoryKvStore {
    fn set(&self, key: &str, value: &str) -> StoreResult<MemoryEntry> {
        validate_memory_key(key)?;
        let entry = MemoryEntry::new(key, value);
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), entry.clone());
        Ok(entry)
    }

    fn get(&self, key: &str) -> StoreResult<Option<MemoryEntry>> {
        Ok(self.entries.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self
            .entries
            .write()
            .map_err(|_| poisoned())?
            .remove(key)
            .is_some())
    }

    fn list(&self, prefix: Option<&str>) -> StoreResult<Vec<MemoryEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let prefix = prefix.unwrap_or("");
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, entry)| entry.clone())
            .collect())
    }
}
