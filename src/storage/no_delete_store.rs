//! Deferred-delete store decorator.
//!
//! Removals are recorded as tombstones instead of being applied to the
//! delegate, so every node of a superseded trie root stays readable until the
//! owner decides which roots to keep and calls [`NoDeleteStore::compact`].

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};

use crate::storage::kv_store::{KVStore, KVStoreError, WriteBatchOperation, WriteBatchOperationExt};
use crate::storage::memory_store::MemoryStore;

/// Lifecycle state of a key inside a [`NoDeleteStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Present in the delegate and not scheduled for deletion
    Live,
    /// Present in the delegate but removed; deleted on the next compaction
    Tombstoned,
}

/// Store wrapper that turns `remove` into a soft delete
pub struct NoDeleteStore {
    delegate: Arc<dyn KVStore>,
    tombstones: Arc<dyn KVStore>,
}

impl NoDeleteStore {
    /// Wrap a delegate, keeping tombstones in memory
    pub fn new(delegate: Arc<dyn KVStore>) -> Self {
        Self::with_tombstones(delegate, Arc::new(MemoryStore::new()))
    }

    /// Wrap a delegate with an explicit tombstone store
    pub fn with_tombstones(delegate: Arc<dyn KVStore>, tombstones: Arc<dyn KVStore>) -> Self {
        Self { delegate, tombstones }
    }

    /// The wrapped store
    pub fn delegate(&self) -> &Arc<dyn KVStore> {
        &self.delegate
    }

    /// State of `key`, or `None` if the delegate does not hold it
    pub fn key_state(&self, key: &[u8]) -> Result<Option<KeyState>, KVStoreError> {
        if !self.delegate.contains_key(key)? {
            return Ok(None);
        }
        if self.tombstones.contains_key(key)? {
            Ok(Some(KeyState::Tombstoned))
        } else {
            Ok(Some(KeyState::Live))
        }
    }

    /// Keys currently tombstoned
    pub fn tombstoned_keys(&self) -> Result<HashSet<Vec<u8>>, KVStoreError> {
        self.tombstones.key_set()
    }

    /// Delete every tombstoned key not in `excludes` from the delegate.
    ///
    /// Excluded keys stay tombstoned, so a later compaction that no longer
    /// excludes them reclaims them.
    pub fn compact(&self, excludes: &HashSet<Vec<u8>>) -> Result<usize, KVStoreError> {
        let tombstoned = self.tombstones.key_set()?;
        let doomed: Vec<Vec<u8>> = tombstoned
            .iter()
            .filter(|k| !excludes.contains(*k))
            .cloned()
            .collect();
        let deleted = doomed.len();
        let mut batch: Vec<WriteBatchOperation> = Vec::with_capacity(deleted);
        for key in &doomed {
            batch.delete(key.clone());
        }
        self.delegate.write_batch(batch)?;

        let mut forgotten: Vec<WriteBatchOperation> = Vec::with_capacity(deleted);
        for key in doomed {
            forgotten.delete(key);
        }
        self.tombstones.write_batch(forgotten)?;
        info!(
            "Compacted store: deleted {} of {} tombstoned keys ({} excluded)",
            deleted,
            tombstoned.len(),
            tombstoned.len() - deleted
        );
        Ok(deleted)
    }

    /// Delete everything tombstoned
    pub fn compact_all(&self) -> Result<usize, KVStoreError> {
        self.compact(&HashSet::new())
    }
}

impl KVStore for NoDeleteStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.tombstones.remove(key)?;
        self.delegate.put(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.delegate.get(key)
    }

    fn remove(&self, key: &[u8]) -> Result<(), KVStoreError> {
        match self.delegate.get(key)? {
            Some(prior) => {
                debug!("Tombstoned key {}", hex::encode(key));
                self.tombstones.put(key, &prior)
            }
            None => Ok(()),
        }
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        self.delegate.contains_key(key)
    }

    fn key_set(&self) -> Result<HashSet<Vec<u8>>, KVStoreError> {
        self.delegate.key_set()
    }

    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError> {
        let mut live = Vec::with_capacity(operations.len());
        for op in operations {
            match op {
                WriteBatchOperation::Put { key, value } => {
                    self.tombstones.remove(&key)?;
                    live.push(WriteBatchOperation::Put { key, value });
                }
                WriteBatchOperation::Delete { key } => {
                    // a put of the same key earlier in this batch must land first
                    if !live.is_empty() {
                        self.delegate.write_batch(std::mem::take(&mut live))?;
                    }
                    self.remove(&key)?;
                }
            }
        }
        self.delegate.write_batch(live)
    }

    fn prefix_lookup(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        self.delegate.prefix_lookup(prefix)
    }

    fn flush(&self) -> Result<(), KVStoreError> {
        self.tombstones.flush()?;
        self.delegate.flush()
    }

    fn close(&self) -> Result<(), KVStoreError> {
        self.tombstones.close()?;
        self.delegate.close()
    }

    fn clear(&self) -> Result<(), KVStoreError> {
        self.delegate.clear()?;
        self.tombstones.clear()
    }

    fn defers_deletes(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<MemoryStore>, NoDeleteStore) {
        let delegate = Arc::new(MemoryStore::new());
        let store = NoDeleteStore::new(delegate.clone());
        (delegate, store)
    }

    #[test]
    fn test_remove_is_soft() {
        let (delegate, store) = setup();
        store.put(b"k", b"v").unwrap();
        store.remove(b"k").unwrap();

        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(store.contains_key(b"k").unwrap());
        assert_eq!(delegate.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.key_state(b"k").unwrap(), Some(KeyState::Tombstoned));
    }

    #[test]
    fn test_put_revives_tombstoned_key() {
        let (_, store) = setup();
        store.put(b"k", b"v").unwrap();
        store.remove(b"k").unwrap();
        store.put(b"k", b"v2").unwrap();

        assert_eq!(store.key_state(b"k").unwrap(), Some(KeyState::Live));
        assert_eq!(store.compact_all().unwrap(), 0);
        assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_remove_absent_key_records_nothing() {
        let (_, store) = setup();
        store.remove(b"missing").unwrap();
        assert!(store.tombstoned_keys().unwrap().is_empty());
        assert_eq!(store.key_state(b"missing").unwrap(), None);
    }

    #[test]
    fn test_compact_with_excludes() {
        let (delegate, store) = setup();
        for k in [b"a", b"b", b"c"] {
            store.put(k, b"v").unwrap();
            store.remove(k).unwrap();
        }

        let mut excludes = HashSet::new();
        excludes.insert(b"b".to_vec());
        assert_eq!(store.compact(&excludes).unwrap(), 2);

        assert_eq!(delegate.get(b"a").unwrap(), None);
        assert_eq!(delegate.get(b"b").unwrap(), Some(b"v".to_vec()));
        assert_eq!(delegate.get(b"c").unwrap(), None);
        assert_eq!(store.key_state(b"b").unwrap(), Some(KeyState::Tombstoned));
        assert_eq!(store.tombstoned_keys().unwrap(), excludes);

        // Once no longer excluded, the key is reclaimed
        assert_eq!(store.compact(&HashSet::new()).unwrap(), 1);
        assert_eq!(delegate.get(b"b").unwrap(), None);
        assert!(store.tombstoned_keys().unwrap().is_empty());
    }

    #[test]
    fn test_batch_delete_then_put_same_key() {
        let (_, store) = setup();
        store.put(b"k", b"v").unwrap();

        let mut batch = Vec::new();
        batch.delete(b"k".to_vec());
        batch.put(b"k".to_vec(), b"v".to_vec());
        store.write_batch(batch).unwrap();

        assert_eq!(store.key_state(b"k").unwrap(), Some(KeyState::Live));
    }

    #[test]
    fn test_clear_resets_both_maps() {
        let (delegate, store) = setup();
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();
        store.remove(b"a").unwrap();

        store.clear().unwrap();
        assert!(delegate.is_empty());
        assert!(store.tombstoned_keys().unwrap().is_empty());

        // bookkeeping still works after clear
        store.put(b"c", b"3").unwrap();
        store.remove(b"c").unwrap();
        assert_eq!(store.key_state(b"c").unwrap(), Some(KeyState::Tombstoned));
        store.compact_all().unwrap();
        assert_eq!(store.get(b"c").unwrap(), None);
    }
}
