use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;

use crate::storage::kv_store::{KVStore, KVStoreError, WriteBatchOperation};

/// Write-back buffer over a delegate store.
///
/// Writes and removals stay in the overlay until [`KVStore::flush`], so a
/// candidate block can build and commit its state trie without touching the
/// shared store until the block is accepted. Dropping the store discards the
/// overlay.
pub struct CachedStore {
    delegate: Arc<dyn KVStore>,
    // None marks a pending removal
    overlay: DashMap<Vec<u8>, Option<Vec<u8>>>,
}

impl CachedStore {
    pub fn new(delegate: Arc<dyn KVStore>) -> Self {
        Self {
            delegate,
            overlay: DashMap::new(),
        }
    }

    /// Number of pending writes and removals
    pub fn pending(&self) -> usize {
        self.overlay.len()
    }

    /// Drop all pending changes
    pub fn discard(&self) {
        self.overlay.clear();
    }
}

impl KVStore for CachedStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.overlay.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        if let Some(entry) = self.overlay.get(key) {
            return Ok(entry.value().clone());
        }
        self.delegate.get(key)
    }

    fn remove(&self, key: &[u8]) -> Result<(), KVStoreError> {
        self.overlay.insert(key.to_vec(), None);
        Ok(())
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        if let Some(entry) = self.overlay.get(key) {
            return Ok(entry.value().is_some());
        }
        self.delegate.contains_key(key)
    }

    fn key_set(&self) -> Result<HashSet<Vec<u8>>, KVStoreError> {
        let mut keys = self.delegate.key_set()?;
        for entry in self.overlay.iter() {
            if entry.value().is_some() {
                keys.insert(entry.key().clone());
            } else {
                keys.remove(entry.key());
            }
        }
        Ok(keys)
    }

    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError> {
        for op in operations {
            match op {
                WriteBatchOperation::Put { key, value } => {
                    self.overlay.insert(key, Some(value));
                }
                WriteBatchOperation::Delete { key } => {
                    self.overlay.insert(key, None);
                }
            }
        }
        Ok(())
    }

    fn prefix_lookup(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        let mut results: Vec<(Vec<u8>, Vec<u8>)> = self
            .delegate
            .prefix_lookup(prefix)?
            .into_iter()
            .filter(|(k, _)| !self.overlay.contains_key(k))
            .collect();
        for entry in self.overlay.iter() {
            if let Some(value) = entry.value() {
                if entry.key().starts_with(prefix) {
                    results.push((entry.key().clone(), value.clone()));
                }
            }
        }
        Ok(results)
    }

    fn flush(&self) -> Result<(), KVStoreError> {
        if self.overlay.is_empty() {
            return self.delegate.flush();
        }
        let keys: Vec<Vec<u8>> = self.overlay.iter().map(|e| e.key().clone()).collect();
        let mut batch = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((key, value)) = self.overlay.remove(&key) {
                match value {
                    Some(value) => batch.push(WriteBatchOperation::Put { key, value }),
                    None => batch.push(WriteBatchOperation::Delete { key }),
                }
            }
        }
        debug!("Flushing {} cached operations", batch.len());
        self.delegate.write_batch(batch)?;
        self.delegate.flush()
    }

    fn defers_deletes(&self) -> bool {
        self.delegate.defers_deletes()
    }

    fn clear(&self) -> Result<(), KVStoreError> {
        self.overlay.clear();
        for key in self.delegate.key_set()? {
            self.overlay.insert(key, None);
        }
        Ok(())
    }
}
