use std::collections::HashSet;
use std::sync::Arc;

use crate::storage::kv_store::{KVStore, KVStoreError, WriteBatchOperation};

/// Namespaces every key of a shared store under a fixed prefix, so several
/// tries (accounts, contract storage, receipts) can live in one database.
pub struct PrefixStore {
    delegate: Arc<dyn KVStore>,
    prefix: Vec<u8>,
}

impl PrefixStore {
    pub fn new(delegate: Arc<dyn KVStore>, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            delegate,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

impl KVStore for PrefixStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.delegate.put(&self.full_key(key), value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.delegate.get(&self.full_key(key))
    }

    fn remove(&self, key: &[u8]) -> Result<(), KVStoreError> {
        self.delegate.remove(&self.full_key(key))
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        self.delegate.contains_key(&self.full_key(key))
    }

    fn key_set(&self) -> Result<HashSet<Vec<u8>>, KVStoreError> {
        Ok(self
            .delegate
            .prefix_lookup(&self.prefix)?
            .into_iter()
            .map(|(k, _)| k[self.prefix.len()..].to_vec())
            .collect())
    }

    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError> {
        let prefixed = operations
            .into_iter()
            .map(|op| match op {
                WriteBatchOperation::Put { key, value } => WriteBatchOperation::Put {
                    key: self.full_key(&key),
                    value,
                },
                WriteBatchOperation::Delete { key } => WriteBatchOperation::Delete {
                    key: self.full_key(&key),
                },
            })
            .collect();
        self.delegate.write_batch(prefixed)
    }

    fn prefix_lookup(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(self
            .delegate
            .prefix_lookup(&self.full_key(prefix))?
            .into_iter()
            .map(|(k, v)| (k[self.prefix.len()..].to_vec(), v))
            .collect())
    }

    fn flush(&self) -> Result<(), KVStoreError> {
        self.delegate.flush()
    }

    fn close(&self) -> Result<(), KVStoreError> {
        // the delegate is shared with other namespaces
        self.delegate.flush()
    }

    fn defers_deletes(&self) -> bool {
        self.delegate.defers_deletes()
    }
}
