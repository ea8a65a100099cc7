use std::collections::HashSet;
use std::sync::Arc;

use crate::crypto::{Hash, HashFunction};
use crate::storage::KVStore;
use crate::trie::error::TrieResult;
use crate::trie::mpt::{check_key, MerklePatriciaTrie};

/// Trie that stores every key under its hash.
///
/// Hashed keys have a fixed length and are spread uniformly, so callers
/// cannot build deep paths by choosing keys. Enumerated keys are the hashes.
pub struct SecureTrie {
    trie: MerklePatriciaTrie,
}

impl SecureTrie {
    pub fn new(store: Arc<dyn KVStore>, hasher: Arc<dyn HashFunction>) -> Self {
        Self {
            trie: MerklePatriciaTrie::new(store, hasher),
        }
    }

    pub fn from_trie(trie: MerklePatriciaTrie) -> Self {
        Self { trie }
    }

    /// The underlying trie, keyed by hashed keys
    pub fn inner(&self) -> &MerklePatriciaTrie {
        &self.trie
    }

    pub fn into_inner(self) -> MerklePatriciaTrie {
        self.trie
    }

    /// Key under which `key` is stored
    pub fn hashed_key(&self, key: &[u8]) -> Hash {
        self.trie.hasher().digest(key)
    }

    pub fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        check_key(key)?;
        self.trie.get(&self.hashed_key(key))
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> TrieResult<()> {
        check_key(key)?;
        let hashed = self.hashed_key(key);
        self.trie.put(&hashed, value)
    }

    pub fn remove(&mut self, key: &[u8]) -> TrieResult<()> {
        check_key(key)?;
        let hashed = self.hashed_key(key);
        self.trie.remove(&hashed)
    }

    pub fn commit(&mut self) -> TrieResult<Hash> {
        self.trie.commit()
    }

    pub fn revert(&self, root_hash: Hash, store: Arc<dyn KVStore>) -> TrieResult<SecureTrie> {
        Ok(SecureTrie::from_trie(self.trie.revert(root_hash, store)?))
    }

    pub fn revert_to(&self, root_hash: Hash) -> TrieResult<SecureTrie> {
        Ok(SecureTrie::from_trie(self.trie.revert_to(root_hash)?))
    }

    pub fn root_hash(&self) -> TrieResult<Hash> {
        self.trie.root_hash()
    }

    pub fn is_dirty(&self) -> bool {
        self.trie.is_dirty()
    }

    /// Hashed keys of every entry
    pub fn key_set(&self) -> TrieResult<HashSet<Vec<u8>>> {
        self.trie.key_set()
    }

    pub fn flush(&self) -> TrieResult<()> {
        self.trie.flush()
    }
}
