//! Block-level state on top of the trie.
//!
//! A [`StateTrie`] maps serde-encoded keys to serde-encoded values. Every
//! block's state is an immutable root; `update` derives a child root from a
//! parent without touching the shared store until the new root is committed,
//! and `prune` reclaims nodes only reachable from roots no longer needed.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::TrieConfig;
use crate::crypto::Hash;
use crate::storage::{CachedStore, KVStore, KVStoreError, NoDeleteStore};
use crate::trie::{MerklePatriciaTrie, TrieError};

/// Error type for state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Trie error: {0}")]
    Trie(#[from] TrieError),

    #[error("Storage error: {0}")]
    Storage(#[from] KVStoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type StateResult<T> = Result<T, StateError>;

/// Versioned key-value state addressed by trie root
pub struct StateTrie<K, V> {
    store: Arc<NoDeleteStore>,
    config: TrieConfig,
    genesis_root: Hash,
    /// Read-only tries by root
    snapshots: DashMap<Hash, Arc<MerklePatriciaTrie>>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> StateTrie<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Open state over `store` and commit the genesis entries.
    ///
    /// Superseded nodes are always disposed: the store defers deletes until
    /// [`prune`](Self::prune).
    pub fn new<I>(store: Arc<dyn KVStore>, config: TrieConfig, genesis: I) -> StateResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let config = TrieConfig {
            dispose_stale_nodes: true,
            ..config
        };
        let store = Arc::new(NoDeleteStore::new(store));

        let mut trie = MerklePatriciaTrie::from_config(store.clone(), &config);
        for (key, value) in genesis {
            trie.put(&encode(&key)?, &encode(&value)?)?;
        }
        let genesis_root = trie.commit()?;
        trie.flush()?;
        info!("Initialized state with genesis root {}", hex::encode(genesis_root));

        Ok(Self {
            store,
            config,
            genesis_root,
            snapshots: DashMap::new(),
            _marker: PhantomData,
        })
    }

    pub fn genesis_root(&self) -> Hash {
        self.genesis_root
    }

    /// Root hash of the empty state
    pub fn empty_root(&self) -> Hash {
        self.base_trie().null_hash()
    }

    pub fn store(&self) -> &Arc<NoDeleteStore> {
        &self.store
    }

    /// Value of `key` in the state at `root`
    pub fn get(&self, root: Hash, key: &K) -> StateResult<Option<V>> {
        let trie = self.trie_at(root)?;
        lookup(&trie, key)
    }

    /// Values of several keys in the state at `root`, in order
    pub fn batch_get(&self, root: Hash, keys: &[K]) -> StateResult<Vec<Option<V>>> {
        let trie = self.trie_at(root)?;
        keys.iter().map(|key| lookup(&trie, key)).collect()
    }

    /// All entries in the state at `root`
    pub fn entries(&self, root: Hash) -> StateResult<Vec<(K, V)>> {
        let trie = self.trie_at(root)?;
        let mut entries = Vec::new();
        for (key, value) in trie.entries()? {
            entries.push((bincode::deserialize(&key)?, bincode::deserialize(&value)?));
        }
        Ok(entries)
    }

    /// Apply `changes` on top of `parent_root` and return the new root.
    ///
    /// A `None` value removes the key. Writes are buffered and only reach
    /// the store once the new root is committed; a failure leaves the store
    /// as it was.
    pub fn update<I>(&self, parent_root: Hash, changes: I) -> StateResult<Hash>
    where
        I: IntoIterator<Item = (K, Option<V>)>,
    {
        let cached = Arc::new(CachedStore::new(self.store.clone()));
        let mut trie = self.base_trie().revert(parent_root, cached.clone())?;

        let mut applied = 0usize;
        for (key, value) in changes {
            let key = encode(&key)?;
            match value {
                Some(value) => trie.put(&key, &encode(&value)?)?,
                None => trie.remove(&key)?,
            }
            applied += 1;
        }

        let root = trie.commit()?;
        cached.flush()?;
        debug!(
            "Updated state {} -> {} ({} changes)",
            hex::encode(parent_root),
            hex::encode(root),
            applied
        );
        Ok(root)
    }

    /// Read-only trie at `root`, cached while there is room
    pub fn trie_at(&self, root: Hash) -> StateResult<Arc<MerklePatriciaTrie>> {
        if let Some(trie) = self.snapshots.get(&root) {
            return Ok(trie.value().clone());
        }

        let trie = Arc::new(self.base_trie().revert_to(root)?);
        if self.snapshots.len() < self.config.snapshot_cache_size {
            self.snapshots.insert(root, trie.clone());
        }
        Ok(trie)
    }

    /// Delete every disposed node not reachable from `retained_roots`.
    ///
    /// Returns the number of nodes deleted. Roots not retained may become
    /// unreadable.
    pub fn prune(&self, retained_roots: &[Hash]) -> StateResult<usize> {
        let mut excludes = HashSet::new();
        for root in retained_roots {
            for hash in self.trie_at(*root)?.dump()? {
                excludes.insert(hash.to_vec());
            }
        }

        let deleted = self.store.compact(&excludes)?;
        self.snapshots.retain(|root, _| retained_roots.contains(root));
        info!(
            "Pruned state: {} nodes deleted, {} roots retained",
            deleted,
            retained_roots.len()
        );
        Ok(deleted)
    }

    fn base_trie(&self) -> MerklePatriciaTrie {
        MerklePatriciaTrie::from_config(self.store.clone(), &self.config)
    }
}

fn encode<T: Serialize>(item: &T) -> StateResult<Vec<u8>> {
    Ok(bincode::serialize(item)?)
}

fn lookup<K: Serialize, V: DeserializeOwned>(trie: &MerklePatriciaTrie, key: &K) -> StateResult<Option<V>> {
    match trie.get(&encode(key)?)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    type Balances = StateTrie<String, u64>;

    fn genesis() -> Vec<(String, u64)> {
        vec![("alice".to_string(), 100), ("bob".to_string(), 50)]
    }

    fn new_state() -> (Arc<MemoryStore>, Balances) {
        let store = Arc::new(MemoryStore::new());
        let state = Balances::new(store.clone(), TrieConfig::default(), genesis()).unwrap();
        (store, state)
    }

    #[test]
    fn test_genesis() {
        let (_, state) = new_state();
        let root = state.genesis_root();
        assert_ne!(root, state.empty_root());
        assert_eq!(state.get(root, &"alice".to_string()).unwrap(), Some(100));
        assert_eq!(state.get(root, &"carol".to_string()).unwrap(), None);

        let values = state
            .batch_get(root, &["bob".to_string(), "carol".to_string()])
            .unwrap();
        assert_eq!(values, vec![Some(50), None]);
    }

    #[test]
    fn test_update_keeps_parent_readable() {
        let (_, state) = new_state();
        let genesis = state.genesis_root();
        let child = state
            .update(
                genesis,
                vec![
                    ("alice".to_string(), Some(70)),
                    ("carol".to_string(), Some(30)),
                    ("bob".to_string(), None),
                ],
            )
            .unwrap();

        assert_eq!(state.get(child, &"alice".to_string()).unwrap(), Some(70));
        assert_eq!(state.get(child, &"bob".to_string()).unwrap(), None);
        assert_eq!(state.get(genesis, &"alice".to_string()).unwrap(), Some(100));
        assert_eq!(state.get(genesis, &"bob".to_string()).unwrap(), Some(50));

        let mut entries = state.entries(child).unwrap();
        entries.sort();
        assert_eq!(entries, vec![("alice".to_string(), 70), ("carol".to_string(), 30)]);
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let (store, state) = new_state();
        let before = store.to_map();

        let result = state.update([7u8; 32], vec![("alice".to_string(), Some(1))]);
        assert!(matches!(result, Err(StateError::Trie(TrieError::MissingNode(_)))));
        assert_eq!(store.to_map(), before);
    }

    #[test]
    fn test_prune_reclaims_unretained_roots() {
        let (store, state) = new_state();
        let genesis = state.genesis_root();
        let r1 = state.update(genesis, vec![("alice".to_string(), Some(90))]).unwrap();
        let r2 = state.update(r1, vec![("alice".to_string(), Some(80))]).unwrap();
        let before = store.len();

        let deleted = state.prune(&[r2]).unwrap();
        assert!(deleted > 0);
        assert_eq!(store.len(), before - deleted);

        assert_eq!(state.get(r2, &"alice".to_string()).unwrap(), Some(80));
        assert_eq!(state.get(r2, &"bob".to_string()).unwrap(), Some(50));
        assert!(matches!(
            state.get(genesis, &"alice".to_string()),
            Err(StateError::Trie(TrieError::MissingNode(_)))
        ));
        assert!(matches!(
            state.get(r1, &"alice".to_string()),
            Err(StateError::Trie(TrieError::MissingNode(_)))
        ));
    }

    #[test]
    fn test_prune_keeps_every_retained_root() {
        let (_, state) = new_state();
        let genesis = state.genesis_root();
        let r1 = state.update(genesis, vec![("bob".to_string(), Some(10))]).unwrap();
        let r2 = state.update(r1, vec![("bob".to_string(), Some(20))]).unwrap();

        state.prune(&[r1, r2]).unwrap();
        assert_eq!(state.get(r1, &"bob".to_string()).unwrap(), Some(10));
        assert_eq!(state.get(r2, &"bob".to_string()).unwrap(), Some(20));
    }

    #[test]
    fn test_staged_prune_reclaims_dropped_root() {
        let (_, state) = new_state();
        let genesis = state.genesis_root();
        let r1 = state.update(genesis, vec![("bob".to_string(), Some(10))]).unwrap();
        let r2 = state.update(r1, vec![("bob".to_string(), Some(20))]).unwrap();

        assert!(state.prune(&[r1, r2]).unwrap() > 0);
        assert_eq!(state.get(r1, &"bob".to_string()).unwrap(), Some(10));

        assert!(state.prune(&[r2]).unwrap() > 0);
        assert!(matches!(
            state.get(r1, &"bob".to_string()),
            Err(StateError::Trie(TrieError::MissingNode(_)))
        ));
        assert_eq!(state.get(r2, &"bob".to_string()).unwrap(), Some(20));
        assert_eq!(state.get(r2, &"alice".to_string()).unwrap(), Some(100));
    }
}
