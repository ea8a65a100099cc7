use std::collections::HashSet;
use std::sync::Arc;

use tempfile::tempdir;

use vibetrie::crypto::keccak256;
use vibetrie::storage::{
    CachedStore, KVStore, KeyState, MemoryStore, NoDeleteStore, PrefixStore, RocksDBStore,
    WriteBatchOperation, WriteBatchOperationExt,
};
use vibetrie::trie::MerklePatriciaTrie;

#[test]
fn test_rocksdb_store_basic_operations() {
    // Create a temporary directory for the database
    let temp_dir = tempdir().unwrap();
    let store = RocksDBStore::new(temp_dir.path()).unwrap();

    store.put(b"key1", b"value1").unwrap();
    store.put(b"key2", b"value2").unwrap();
    assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
    assert!(store.contains_key(b"key2").unwrap());

    store.remove(b"key1").unwrap();
    assert_eq!(store.get(b"key1").unwrap(), None);
    store.remove(b"never-written").unwrap();

    let mut batch = Vec::new();
    batch.put(b"pre:a".to_vec(), b"1".to_vec());
    batch.put(b"pre:b".to_vec(), b"2".to_vec());
    batch.delete(b"key2".to_vec());
    store.write_batch(batch).unwrap();

    let keys = store.key_set().unwrap();
    let expected: HashSet<Vec<u8>> = [b"pre:a".to_vec(), b"pre:b".to_vec()].into_iter().collect();
    assert_eq!(keys, expected);

    let mut found = store.prefix_lookup(b"pre:").unwrap();
    found.sort();
    assert_eq!(found, vec![(b"pre:a".to_vec(), b"1".to_vec()), (b"pre:b".to_vec(), b"2".to_vec())]);

    store.clear().unwrap();
    assert!(store.key_set().unwrap().is_empty());
    store.flush().unwrap();
}

#[test]
fn test_no_delete_store_over_rocksdb() {
    let temp_dir = tempdir().unwrap();
    let db: Arc<dyn KVStore> = Arc::new(RocksDBStore::new(temp_dir.path()).unwrap());
    let store = NoDeleteStore::with_tombstones(
        Arc::new(PrefixStore::new(db.clone(), b"data:".to_vec())),
        Arc::new(PrefixStore::new(db.clone(), b"tomb:".to_vec())),
    );

    store.put(b"keep", b"1").unwrap();
    store.put(b"drop", b"2").unwrap();
    store.put(b"revive", b"3").unwrap();

    store
        .write_batch(vec![
            WriteBatchOperation::Delete { key: b"keep".to_vec() },
            WriteBatchOperation::Delete { key: b"drop".to_vec() },
            WriteBatchOperation::Delete { key: b"revive".to_vec() },
        ])
        .unwrap();
    store.put(b"revive", b"4").unwrap();

    assert_eq!(store.key_state(b"keep").unwrap(), Some(KeyState::Tombstoned));
    assert_eq!(store.key_state(b"revive").unwrap(), Some(KeyState::Live));
    assert_eq!(store.get(b"drop").unwrap(), Some(b"2".to_vec()));

    let excludes: HashSet<Vec<u8>> = [b"keep".to_vec()].into_iter().collect();
    assert_eq!(store.compact(&excludes).unwrap(), 1);

    assert_eq!(store.get(b"keep").unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.get(b"drop").unwrap(), None);
    assert_eq!(store.get(b"revive").unwrap(), Some(b"4".to_vec()));
    assert_eq!(store.key_state(b"keep").unwrap(), Some(KeyState::Tombstoned));

    // Tombstones live in their own namespace of the shared database
    let tombstones = db.prefix_lookup(b"tomb:").unwrap();
    assert_eq!(tombstones, vec![(b"tomb:keep".to_vec(), b"1".to_vec())]);
    assert_eq!(db.prefix_lookup(b"data:").unwrap().len(), 2);

    assert_eq!(store.compact_all().unwrap(), 1);
    assert_eq!(store.get(b"keep").unwrap(), None);
    assert!(db.prefix_lookup(b"tomb:").unwrap().is_empty());
}

#[test]
fn test_cached_store_isolates_until_flush() {
    let backing = Arc::new(MemoryStore::new());
    backing.put(b"existing", b"old").unwrap();

    let cached = CachedStore::new(backing.clone());
    cached.put(b"new", b"value").unwrap();
    cached.put(b"existing", b"changed").unwrap();
    cached.remove(b"new").unwrap();
    cached.put(b"other", b"x").unwrap();

    assert_eq!(cached.get(b"existing").unwrap(), Some(b"changed".to_vec()));
    assert_eq!(cached.get(b"new").unwrap(), None);
    assert_eq!(backing.get(b"existing").unwrap(), Some(b"old".to_vec()));
    assert_eq!(backing.get(b"other").unwrap(), None);

    cached.flush().unwrap();
    assert_eq!(cached.pending(), 0);
    assert_eq!(backing.get(b"existing").unwrap(), Some(b"changed".to_vec()));
    assert_eq!(backing.get(b"other").unwrap(), Some(b"x".to_vec()));
    assert_eq!(backing.get(b"new").unwrap(), None);
}

#[test]
fn test_trie_over_cached_store() {
    let backing = Arc::new(MemoryStore::new());
    let mut base = MerklePatriciaTrie::new(backing.clone(), Arc::new(keccak256));
    base.put(b"account", b"100").unwrap();
    let parent = base.commit().unwrap();
    let stored = backing.len();

    // Build a candidate state without touching the backing store
    let cached = Arc::new(CachedStore::new(backing.clone()));
    let mut candidate = base.revert(parent, cached.clone()).unwrap();
    candidate.put(b"account", b"90").unwrap();
    candidate.put(b"fee", b"10").unwrap();
    let child = candidate.commit().unwrap();

    assert_eq!(backing.len(), stored);
    assert!(matches!(
        base.revert_to(child),
        Err(vibetrie::trie::TrieError::MissingNode(_))
    ));

    // Accepting the block makes the child root visible to everyone
    cached.flush().unwrap();
    let accepted = base.revert_to(child).unwrap();
    assert_eq!(accepted.get(b"fee").unwrap(), Some(b"10".to_vec()));
    assert_eq!(base.revert_to(parent).unwrap().get(b"account").unwrap(), Some(b"100".to_vec()));
}

#[test]
fn test_prefix_stores_share_a_database() {
    let temp_dir = tempdir().unwrap();
    let db: Arc<dyn KVStore> = Arc::new(RocksDBStore::new(temp_dir.path()).unwrap());
    let accounts = Arc::new(PrefixStore::new(db.clone(), b"accounts:".to_vec()));
    let storage = Arc::new(PrefixStore::new(db.clone(), b"storage:".to_vec()));

    let mut account_trie = MerklePatriciaTrie::new(accounts.clone(), Arc::new(keccak256));
    let mut storage_trie = MerklePatriciaTrie::new(storage.clone(), Arc::new(keccak256));
    account_trie.put(b"alice", b"1").unwrap();
    storage_trie.put(b"slot0", b"2").unwrap();
    account_trie.commit().unwrap();
    let storage_root = storage_trie.commit().unwrap();

    assert_eq!(accounts.key_set().unwrap().len(), 1);
    assert_eq!(storage.key_set().unwrap().len(), 1);
    assert!(storage.contains_key(&storage_root).unwrap());
    assert!(!accounts.contains_key(&storage_root).unwrap());
    assert_eq!(db.key_set().unwrap().len(), 2);
}
