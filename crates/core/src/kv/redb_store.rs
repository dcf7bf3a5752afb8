use super::KvStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{validate_memory_key, MemoryEntry};
use redb::{Database, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const MEMORY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("memory");

fn db_err(err: impl Into<redb::Error>) -> StoreError {
    StoreError::from(err.into())
}

/// Key/value memory persisted in a redb file
#[derive(Clone)]
pub struct RedbKvStore {
    db: Arc<Database>,
}

impl RedbKvStore {
    pub fn new(path: PathBuf) -> StoreResult<Self> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
        }

        let db = Database::create(&path).map_err(db_err)?;

        let write_txn = db.begin_write().map_err(db_err)?;
        {
            let _memory_table = write_txn.open_table(MEMORY_TABLE).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;

        tracing::debug!(path = %path.display(), "Opened memory store");
        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RedbKvStore {
    fn set(&self, key: &str, value: &str) -> StoreResult<MemoryEntry> {
        validate_memory_key(key)?;
        let entry = MemoryEntry::new(key, value);
        let bytes = serde_json::to_vec(&entry)?;

        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(MEMORY_TABLE).map_err(db_err)?;
            table.insert(key, bytes.as_slice()).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(entry)
    }

    fn get(&self, key: &str) -> StoreResult<Option<MemoryEntry>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(MEMORY_TABLE).map_err(db_err)?;

        match table.get(key).map_err(db_err)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        let mut table = write_txn.open_table(MEMORY_TABLE).map_err(db_err)?;
        let removed = table.remove(key).map_err(db_err)?.is_some();
        drop(table);
        write_txn.commit().map_err(db_err)?;
        Ok(removed)
    }

    fn list(&self, prefix: Option<&str>) -> StoreResult<Vec<MemoryEntry>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(MEMORY_TABLE).map_err(db_err)?;
        let prefix = prefix.unwrap_or("");

        let mut entries = Vec::new();
        for item in table.range(prefix..).map_err(db_err)? {
            let (key, value) = item.map_err(db_err)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_redb_kv_store() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("memory.redb");
        let store = RedbKvStore::new(path.clone()).unwrap();

        store.set("b", "2").unwrap();
        store.set("a/1", "one").unwrap();
        store.set("a/2", "two").unwrap();

        assert_eq!(store.get("b").unwrap().unwrap().value, "2");
        assert!(store.get("missing").unwrap().is_none());

        let listed = store.list(Some("a/")).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, "a/1");

        assert!(store.delete("b").unwrap());
        assert!(!store.delete("b").unwrap());
        assert_eq!(store.list(None).unwrap().len(), 2);
    }

    #[test]
    fn test_redb_kv_store_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/memory.redb");

        {
            let store = RedbKvStore::new(path.clone()).unwrap();
            store.set("greeting", "hello").unwrap();
        }

        let reopened = RedbKvStore::new(path).unwrap();
        assert_eq!(reopened.get("greeting").unwrap().unwrap().value, "hello");
    }
}
