use serde::{Serialize, Deserialize};

use crate::crypto::HashAlgorithm;

/// Trie engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrieConfig {
    /// Hash function used to address nodes
    pub hash_algorithm: HashAlgorithm,

    /// Remove superseded nodes from the store on commit.
    ///
    /// Honored only by stores that defer deletes (`NoDeleteStore`), where the
    /// removals become tombstones until compaction. Plain stores keep every
    /// node.
    pub dispose_stale_nodes: bool,

    /// Maximum number of decoded nodes cached per working trie
    pub node_cache_size: usize,

    /// Maximum number of read-only snapshots kept by a state trie
    pub snapshot_cache_size: usize,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Keccak256,
            dispose_stale_nodes: true,
            node_cache_size: 10000,
            snapshot_cache_size: 32,
        }
    }
}
