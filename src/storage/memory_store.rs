use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use crate::storage::kv_store::{KVStore, KVStoreError, WriteBatchOperation};

/// In-memory KVStore backed by a concurrent hash map.
///
/// Used for tests, tombstone bookkeeping and for rebuilding a trie from a
/// proof or a dump.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: DashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Create a store pre-populated with the given pairs
    pub fn from_map<K, V>(entries: HashMap<K, V>) -> Self
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let map = DashMap::with_capacity(entries.len());
        for (k, v) in entries {
            map.insert(k.into(), v.into());
        }
        Self { map }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Copy all entries into a plain map
    pub fn to_map(&self) -> HashMap<Vec<u8>, Vec<u8>> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl KVStore for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    fn remove(&self, key: &[u8]) -> Result<(), KVStoreError> {
        self.map.remove(key);
        Ok(())
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.map.contains_key(key))
    }

    fn key_set(&self) -> Result<HashSet<Vec<u8>>, KVStoreError> {
        Ok(self.map.iter().map(|entry| entry.key().clone()).collect())
    }

    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError> {
        for op in operations {
            match op {
                WriteBatchOperation::Put { key, value } => {
                    self.map.insert(key, value);
                }
                WriteBatchOperation::Delete { key } => {
                    self.map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn prefix_lookup(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(self
            .map
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    fn flush(&self) -> Result<(), KVStoreError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), KVStoreError> {
        self.map.clear();
        Ok(())
    }
}
