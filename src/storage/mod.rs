// Storage module for the Vibecoin state trie
// Provides the byte-keyed store abstraction and its decorators

pub mod kv_store;
pub mod memory_store;
pub mod no_delete_store;
pub mod cached_store;
pub mod prefix_store;

// Re-export main components
pub use kv_store::{KVStore, KVStoreError, RocksDBStore, WriteBatchOperation, WriteBatchOperationExt};
pub use memory_store::MemoryStore;
pub use no_delete_store::{KeyState, NoDeleteStore};
pub use cached_store::CachedStore;
pub use prefix_store::PrefixStore;
