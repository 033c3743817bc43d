//! Persistent key-value pools.
//!
//! The payment watcher persists two kinds of state: the last processed
//! block per currency and the payment record found for each pay id. Both
//! live in flat binary pools behind a small trait, backed by sled.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use sled::{Db, Tree};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
}

/// A flat binary key-value pool.
///
/// Keys are short byte strings; values are opaque. Writes replace any
/// existing value for the key.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
}

/// One named tree inside the sled database.
#[derive(Clone)]
pub struct SledPool {
    tree: Tree,
}

impl KeyValueStore for SledPool {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tree.get(key)?.map(|value| value.to_vec()))
    }
}

/// The pools used by the payment watcher.
pub struct SledStorage {
    db: Db,
    pub currency: SledPool,
    pub payments: SledPool,
}

impl SledStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(SledStorage {
            currency: SledPool {
                tree: db.open_tree("currency")?,
            },
            payments: SledPool {
                tree: db.open_tree("payments")?,
            },
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// In-memory pool for tests and embedding without persistence.
#[derive(Debug, Default)]
pub struct MemoryPool {
    map: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl KeyValueStore for MemoryPool {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut map = self.map.lock().expect("memory pool lock poisoned");
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let map = self.map.lock().expect("memory pool lock poisoned");
        Ok(map.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pool_put_get() {
        let pool = MemoryPool::default();
        assert_eq!(pool.get(b"missing").unwrap(), None);
        pool.put(b"key", b"first").unwrap();
        pool.put(b"key", b"second").unwrap();
        assert_eq!(pool.get(b"key").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn test_sled_pools_are_independent() {
        let directory = std::env::temp_dir().join(format!(
            "claimchain-storage-test-{}",
            std::process::id()
        ));
        let storage = SledStorage::new(&directory).unwrap();
        storage.currency.put(b"key", b"checkpoint").unwrap();
        storage.payments.put(b"key", b"payment").unwrap();
        assert_eq!(
            storage.currency.get(b"key").unwrap(),
            Some(b"checkpoint".to_vec())
        );
        assert_eq!(
            storage.payments.get(b"key").unwrap(),
            Some(b"payment".to_vec())
        );
        storage.flush().unwrap();
        drop(storage);
        let _ = std::fs::remove_dir_all(&directory);
    }
}
